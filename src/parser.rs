//! Byte-buffer -> structured request parsing.
//!
//! Grounded in `proxy_parse.c` from the original implementation: single
//! pass, `strtok`-style splitting translated into safe slice operations,
//! every retained substring copied so the result never aliases the input.

use crate::error::ProxyError;

pub const MAX_HEADERS: usize = 50;
const DEFAULT_PORT: &str = "80";
const DEFAULT_HOST: &str = "localhost";

/// A parsed HTTP/1.x request. Owns every string it exposes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub protocol: String,
    pub host: String,
    pub port: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<String>,
    pub body: Option<Vec<u8>>,
}

impl ParsedRequest {
    /// `"<host>:<port><path>"`, the cache key shape from the spec's data model.
    pub fn cache_key(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.path)
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }
}

/// Parse a raw client read into a [`ParsedRequest`].
///
/// Single-pass: splits on the header/body boundary first, then the
/// request line, then remaining header lines, allocating copies
/// throughout so the result owns all of its data.
pub fn parse(buffer: &[u8]) -> Result<ParsedRequest, ProxyError> {
    if buffer.is_empty() {
        return Err(ProxyError::MalformedRequest("empty request".into()));
    }

    let (header_block, body) = split_header_body(buffer);

    let header_text = std::str::from_utf8(header_block)
        .map_err(|_| ProxyError::MalformedRequest("request is not valid UTF-8".into()))?;

    let mut lines = header_text.split("\r\n").flat_map(|l| l.split('\n'));

    let request_line = lines
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing request line".into()))?;

    let mut tokens = request_line.split(' ').filter(|t| !t.is_empty());
    let method = tokens.next();
    let target = tokens.next();
    let version = tokens.next();
    if tokens.next().is_some() || method.is_none() || target.is_none() || version.is_none() {
        return Err(ProxyError::MalformedRequest(
            "request line must be `METHOD target VERSION`".into(),
        ));
    }
    let method = method.unwrap().to_string();
    let target = target.unwrap();
    let version = version.unwrap().to_string();

    let mut host: Option<String> = None;
    let mut port: Option<String> = None;
    let path: String;
    let protocol = "http".to_string();

    if let Some(rest) = target.strip_prefix("http://") {
        let (authority, target_path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        path = target_path.to_string();
        let (h, p) = split_authority(authority);
        host = Some(h);
        port = p;
    } else {
        path = target.to_string();
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if headers.len() >= MAX_HEADERS {
            break;
        }
        if host.is_none() {
            if let Some(value) = strip_header_name(line, "host") {
                let (h, p) = split_authority(value.trim());
                host = Some(h);
                if p.is_some() {
                    port = p;
                }
            }
        }
        headers.push(line.to_string());
    }

    let host = host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = port.unwrap_or_else(|| DEFAULT_PORT.to_string());

    if method.is_empty() || path.is_empty() {
        return Err(ProxyError::MalformedRequest(
            "method and path must be non-empty".into(),
        ));
    }

    Ok(ParsedRequest {
        method,
        protocol,
        host,
        port,
        path,
        version,
        headers,
        body: body.map(<[u8]>::to_vec),
    })
}

/// Split on the first `\r\n\r\n`, falling back to `\n\n`. Returns the header
/// block and, if present, the exact byte slice following the separator.
fn split_header_body(buffer: &[u8]) -> (&[u8], Option<&[u8]>) {
    if let Some(pos) = find_subslice(buffer, b"\r\n\r\n") {
        return (&buffer[..pos], Some(&buffer[pos + 4..]));
    }
    if let Some(pos) = find_subslice(buffer, b"\n\n") {
        return (&buffer[..pos], Some(&buffer[pos + 2..]));
    }
    (buffer, None)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn strip_header_name<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let colon = line.find(':')?;
    if line[..colon].eq_ignore_ascii_case(name) {
        Some(&line[colon + 1..])
    } else {
        None
    }
}

/// Split `host[:port]` on the last `:` (so IPv6-style bracket forms are left
/// intact in `host` rather than misparsed; the spec only requires IPv4/DNS
/// names to round-trip correctly).
fn split_authority(authority: &str) -> (String, Option<String>) {
    match authority.rfind(':') {
        Some(idx) => (
            authority[..idx].to_string(),
            Some(authority[idx + 1..].to_string()),
        ),
        None => (authority.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_form_with_port() {
        let req = parse(b"GET http://example.com:8080/a/b HTTP/1.1\r\nHost: ignored\r\n\r\n")
            .expect("parse");
        assert_eq!(req.method, "GET");
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, "8080");
        assert_eq!(req.path, "/a/b");
        assert_eq!(req.version, "HTTP/1.1");
    }

    #[test]
    fn absolute_form_without_path_defaults_to_slash() {
        let req = parse(b"GET http://example.com HTTP/1.1\r\n\r\n").expect("parse");
        assert_eq!(req.path, "/");
        assert_eq!(req.port, "80");
    }

    #[test]
    fn origin_form_uses_host_header() {
        let req = parse(b"GET /a HTTP/1.1\r\nHost: example.com:9090\r\n\r\n").expect("parse");
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, "9090");
        assert_eq!(req.path, "/a");
    }

    #[test]
    fn origin_form_host_header_case_insensitive_and_trimmed() {
        let req = parse(b"GET /a HTTP/1.1\r\nhOsT:   example.com  \r\n\r\n").expect("parse");
        assert_eq!(req.host, "example.com");
    }

    #[test]
    fn missing_host_defaults_to_localhost() {
        let req = parse(b"GET /a HTTP/1.1\r\n\r\n").expect("parse");
        assert_eq!(req.host, "localhost");
        assert_eq!(req.port, "80");
    }

    #[test]
    fn body_is_exact_byte_slice_after_separator() {
        let req = parse(b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 3\r\n\r\nABC").unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"ABC"[..]));
        assert_eq!(req.body_len(), 3);
    }

    #[test]
    fn lf_only_separator_is_accepted_as_fallback() {
        let req = parse(b"GET /x HTTP/1.1\nHost: h\n\nBODY").unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"BODY"[..]));
    }

    #[test]
    fn headers_capped_at_fifty() {
        let mut raw = String::from("GET /x HTTP/1.1\r\n");
        for i in 0..60 {
            raw.push_str(&format!("X-{i}: v\r\n"));
        }
        raw.push_str("\r\n");
        let req = parse(raw.as_bytes()).unwrap();
        assert_eq!(req.headers.len(), MAX_HEADERS);
    }

    #[test]
    fn empty_buffer_is_malformed() {
        assert!(parse(b"").is_err());
    }

    #[test]
    fn request_line_with_wrong_token_count_is_malformed() {
        assert!(parse(b"GET /\r\n\r\n").is_err());
        assert!(parse(b"GET\r\n\r\n").is_err());
        assert!(parse(b"GET / HTTP/1.1 extra\r\n\r\n").is_err());
    }

    #[test]
    fn cache_key_matches_host_port_path_shape() {
        let req = parse(b"GET http://h:8080/p HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.cache_key(), "h:8080/p");
    }
}
