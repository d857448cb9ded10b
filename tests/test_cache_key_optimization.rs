//! The cache key is the literal string `"<host>:<port><path>"`, not a
//! hash: these tests pin that exact shape and its collision behavior
//! across the fields that make up identity.

use hoardproxy::parser::parse;

fn key_for(request: &str) -> String {
    parse(request.as_bytes()).expect("parse").cache_key()
}

#[test]
fn cache_key_is_host_colon_port_path() {
    let key = key_for("GET http://example.com:8080/path HTTP/1.1\r\n\r\n");
    assert_eq!(key, "example.com:8080/path");
}

#[test]
fn cache_key_differs_by_port_alone() {
    let a = key_for("GET http://example.com:80/path HTTP/1.1\r\n\r\n");
    let b = key_for("GET http://example.com:443/path HTTP/1.1\r\n\r\n");
    assert_ne!(a, b);
}

#[test]
fn cache_key_differs_by_host_alone() {
    let a = key_for("GET /path HTTP/1.1\r\nHost: a.example\r\n\r\n");
    let b = key_for("GET /path HTTP/1.1\r\nHost: b.example\r\n\r\n");
    assert_ne!(a, b);
}

#[test]
fn cache_key_differs_by_path_alone() {
    let a = key_for("GET /one HTTP/1.1\r\nHost: h\r\n\r\n");
    let b = key_for("GET /two HTTP/1.1\r\nHost: h\r\n\r\n");
    assert_ne!(a, b);
}

#[test]
fn cache_key_is_deterministic_for_identical_requests() {
    let raw = "GET http://example.com:8080/path HTTP/1.1\r\nHost: ignored\r\n\r\n";
    assert_eq!(key_for(raw), key_for(raw));
}
