//! Upstream dialing, request reconstruction, and the stream/accumulate
//! loop that backs GET (cacheable) and POST (never cached) proxying.
//!
//! Grounded in `http_handler.c`: `connect_remote_server` becomes [`dial`],
//! `handle_get`/`handle_post` keep their shapes, `send_error_response`
//! becomes [`render_error_page`] (with a correct `Content-Length`, unlike
//! the original's `+100`-padded one).

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::error::ProxyError;
use crate::parser::ParsedRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const UPSTREAM_IO_TIMEOUT: Duration = Duration::from_secs(30);
const READ_CHUNK: usize = 4096;
/// Accumulation abandons beyond this point; forwarding continues but the
/// response is never cached (strict inequality at exactly 50 MiB).
const MAX_ACCUMULATE: usize = 50 * 1024 * 1024;

/// Serve a GET, either from cache or by dialing the origin and streaming
/// its response back while accumulating it for a possible cache insert.
pub async fn handle_get(
    client: &mut TcpStream,
    request: &ParsedRequest,
    cache: &Cache,
) -> Result<(), ProxyError> {
    let key = request.cache_key();

    if let Some(payload) = cache.find(&key).await {
        debug!(%key, "cache hit");
        client.write_all(&payload).await.map_err(|_| ProxyError::ClientGone)?;
        return Ok(());
    }
    debug!(%key, "cache miss");

    let port = parse_port(&request.port)?;
    let mut upstream = dial(&request.host, port).await?;

    let outbound = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nUser-Agent: ProxyServer/1.0\r\n\r\n",
        request.path, request.host
    );
    timeout(UPSTREAM_IO_TIMEOUT, upstream.write_all(outbound.as_bytes()))
        .await
        .map_err(|_| ProxyError::UpstreamUnreachable("send to origin timed out".into()))?
        .map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()))?;

    let mut accumulated = BytesMut::new();
    let mut accumulating = true;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = match timeout(UPSTREAM_IO_TIMEOUT, upstream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ProxyError::UpstreamUnreachable(e.to_string())),
            Err(_) => return Err(ProxyError::UpstreamTimeout),
        };

        client
            .write_all(&chunk[..read])
            .await
            .map_err(|_| ProxyError::ClientGone)?;

        if accumulating {
            if accumulated.len() + read > MAX_ACCUMULATE {
                accumulating = false;
                debug!(%key, "response exceeds accumulation cap, forwarding without caching");
            } else {
                accumulated.extend_from_slice(&chunk[..read]);
            }
        }
    }

    if accumulating && !accumulated.is_empty() {
        let body: Bytes = accumulated.freeze();
        if cache.add(key.clone(), body).await {
            info!(%key, "cached response");
        } else {
            warn!(%key, "response rejected by cache (too large)");
        }
    }

    Ok(())
}

/// Forward a POST verbatim (raw client bytes, untouched) and stream the
/// origin's response back. Never consults or populates the cache.
pub async fn handle_post(
    client: &mut TcpStream,
    request: &ParsedRequest,
    raw_request: &[u8],
) -> Result<(), ProxyError> {
    let port = parse_port(&request.port)?;
    let mut upstream = dial(&request.host, port).await?;

    timeout(UPSTREAM_IO_TIMEOUT, upstream.write_all(raw_request))
        .await
        .map_err(|_| ProxyError::UpstreamUnreachable("send to origin timed out".into()))?
        .map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()))?;

    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let read = match timeout(UPSTREAM_IO_TIMEOUT, upstream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ProxyError::UpstreamUnreachable(e.to_string())),
            Err(_) => return Err(ProxyError::UpstreamTimeout),
        };
        client
            .write_all(&chunk[..read])
            .await
            .map_err(|_| ProxyError::ClientGone)?;
    }

    Ok(())
}

fn parse_port(port: &str) -> Result<u16, ProxyError> {
    port.parse::<u16>()
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| ProxyError::UpstreamUnreachable(format!("invalid port: {port}")))
}

async fn dial(host: &str, port: u16) -> Result<TcpStream, ProxyError> {
    match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            debug!(%host, port, "connected to origin");
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProxyError::UpstreamUnreachable(e.to_string())),
        Err(_) => Err(ProxyError::UpstreamUnreachable("connect timed out".into())),
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// Render a minimal HTML error page with a correctly computed
/// `Content-Length` (the original's constant `+100` padding is a known
/// bug and is not reproduced).
pub fn render_error_page(status: u16, message: &str) -> Vec<u8> {
    let text = status_text(status);
    let body = format!(
        "<html><head><title>{status} {text}</title></head><body><h1>{status} {text}</h1><p>{message}</p></body></html>"
    );
    format!(
        "HTTP/1.1 {status} {text}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_page_content_length_matches_body() {
        let page = render_error_page(502, "Failed to connect to remote server");
        let text = String::from_utf8(page).unwrap();
        let header_end = text.find("\r\n\r\n").unwrap();
        let body = &text[header_end + 4..];
        let declared: usize = text
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(declared, body.len());
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway"));
        assert!(text.contains("Connection: close"));
    }

    #[test]
    fn parse_port_rejects_zero_and_garbage() {
        assert!(parse_port("0").is_err());
        assert!(parse_port("not-a-port").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("8080").is_ok());
    }
}
