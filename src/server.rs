//! Connection acceptance, admission control, and per-connection dispatch.
//!
//! Grounded in the teacher's `main_backup.rs` accept loop: a `tokio::select!`
//! between the listener and the shutdown signals, an admission gate before
//! each worker spawns, and graceful drain on SIGINT/SIGTERM. The counting
//! semaphore replaces that file's `AtomicUsize` connection counter with the
//! primitive `http_handler.c`'s `sem_t` actually used.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cache::Cache;
use crate::error::ProxyError;
use crate::file_endpoints;
use crate::forwarder;
use crate::parser::{self, ParsedRequest};

pub const MAX_CLIENTS: usize = 400;
const LISTEN_BACKLOG: u32 = 400;
/// Single fixed-size read per connection; requests whose request line or
/// headers don't fit are parse failures. A known limitation, not a bug
/// (see the request-lifecycle design notes).
pub const READ_BUFFER_SIZE: usize = 4095;

pub struct ConnectionServer {
    listener: TcpListener,
    cache: Cache,
    admission: Arc<Semaphore>,
}

impl ConnectionServer {
    pub async fn bind(port: u16) -> anyhow::Result<Self> {
        let listener = bind_with_backlog(port, LISTEN_BACKLOG)
            .await
            .with_context(|| format!("failed to bind 0.0.0.0:{port}"))?;
        Ok(Self {
            listener,
            cache: Cache::new(),
            admission: Arc::new(Semaphore::new(MAX_CLIENTS)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop: runs until a SIGINT/SIGTERM is observed, then stops
    /// admitting new connections and waits for in-flight workers to drain.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        info!(addr = %self.listener.local_addr()?, "listening");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => self.dispatch(socket, addr),
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }
            }
        }

        info!(
            in_flight = MAX_CLIENTS - self.admission.available_permits(),
            "waiting for in-flight connections to drain"
        );
        // Acquiring every permit blocks until all in-flight workers have
        // released theirs; there is no other way back in once shutdown begins.
        let _ = self.admission.acquire_many(MAX_CLIENTS as u32).await;
        info!("all connections drained, exiting");
        Ok(())
    }

    fn dispatch(&self, socket: TcpStream, addr: std::net::SocketAddr) {
        let permit = match self.admission.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(%addr, "admission limit reached, rejecting connection");
                tokio::spawn(reject_connection(socket));
                return;
            }
        };
        let cache = self.cache.clone();
        debug!(%addr, "accepted connection");
        tokio::spawn(async move {
            let _permit = permit;
            serve_one(socket, cache).await;
        });
    }
}

async fn reject_connection(socket: TcpStream) {
    use tokio::io::AsyncWriteExt;
    let mut socket = socket;
    let page = forwarder::render_error_page(503, "Too many concurrent connections");
    let _ = socket.write_all(&page).await;
}

async fn bind_with_backlog(port: u16, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = tokio::net::TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(std::net::SocketAddr::from(([0, 0, 0, 0], port)))?;
    socket.listen(backlog)
}

/// One worker: read exactly one request, route it, write exactly one
/// response, then drop the socket. No keep-alive, no request pipelining.
async fn serve_one(mut socket: TcpStream, cache: Cache) {
    use tokio::io::AsyncReadExt;

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let read = match socket.read(&mut buffer).await {
        Ok(0) => return,
        Ok(n) => n,
        Err(e) => {
            debug!(error = %e, "client read failed");
            return;
        }
    };
    buffer.truncate(read);

    let request = match parser::parse(&buffer) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "malformed request");
            write_error(&mut socket, e.status_code().unwrap_or(400), &e.to_string()).await;
            return;
        }
    };

    let outcome = route(&mut socket, &request, &buffer, &cache).await;
    if let Err(e) = outcome {
        if let Some(status) = e.status_code() {
            write_error(&mut socket, status, &e.to_string()).await;
        } else {
            debug!(error = %e, "worker terminated without a response");
        }
    }
}

async fn route(
    socket: &mut TcpStream,
    request: &ParsedRequest,
    raw_request: &[u8],
    cache: &Cache,
) -> Result<(), ProxyError> {
    match request.method.as_str() {
        "GET" if file_endpoints::is_find_path(&request.path) => {
            file_endpoints::handle_get_find(socket, request).await
        }
        "GET" if file_endpoints::is_files_path(&request.path) => {
            file_endpoints::handle_get_files(socket, request).await
        }
        "GET" => forwarder::handle_get(socket, request, cache).await,
        "PUT" if file_endpoints::is_find_path(&request.path) => {
            file_endpoints::handle_put_find(socket, request).await
        }
        "POST" if looks_like_upload(&request.path) => {
            file_endpoints::handle_upload(socket, request).await
        }
        "POST" => forwarder::handle_post(socket, request, raw_request).await,
        other => Err(ProxyError::UnsupportedMethod(other.to_string())),
    }
}

fn looks_like_upload(path: &str) -> bool {
    path.starts_with("/upload/") || path.starts_with("/uploads/")
}

async fn write_error(socket: &mut TcpStream, status: u16, message: &str) {
    use tokio::io::AsyncWriteExt;
    let page = forwarder::render_error_page(status, message);
    if let Err(e) = socket.write_all(&page).await {
        debug!(error = %e, "failed to write error response to client");
    }
}
