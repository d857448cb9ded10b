//! Shared test harness, compiled separately into each integration test
//! binary; not every binary uses every helper here.
#![allow(dead_code)]

use std::net::SocketAddr;

use hoardproxy::ConnectionServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Starts a proxy on an ephemeral port and leaves its accept loop running
/// in the background for the duration of the test process.
pub async fn start_proxy() -> SocketAddr {
    let server = ConnectionServer::bind(0).await.expect("bind proxy");
    let addr = server.local_addr().expect("local_addr");
    tokio::spawn(server.run());
    addr
}

/// Starts a canned origin server: every accepted connection gets the same
/// fixed 200 OK response with `body` as content, regardless of the request.
pub async fn spawn_origin(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind origin");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    addr
}

pub async fn send_request(addr: SocketAddr, request: &str) -> String {
    let mut socket = tokio::net::TcpStream::connect(addr).await.expect("connect");
    socket.write_all(request.as_bytes()).await.expect("write request");
    let mut response = Vec::new();
    // A server that reads only part of an oversized request and then
    // closes leaves bytes unread in its receive queue, so the kernel
    // sends a RST instead of a clean FIN once the response has already
    // gone out. Whatever arrived before the reset is still the response;
    // a trailing ConnectionReset is not itself a test failure.
    loop {
        let mut chunk = [0u8; 4096];
        match socket.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => break,
            Err(e) => panic!("read response: {e}"),
        }
    }
    String::from_utf8_lossy(&response).into_owned()
}
