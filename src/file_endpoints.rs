//! Local-filesystem upload/download endpoints that share the proxy's
//! listening port: `/find/<relpath>` (PUT to write, GET to read back),
//! `/files/<relpath>` (GET as an attachment download), and arbitrary-path
//! POST uploads into `./uploads/`.
//!
//! Grounded in `file_share.c` (`save_file`/`read_file`/`file_exists`) and
//! `http_handler.c`'s `handle_file_upload`/`handle_file_download`, which
//! this module replaces with a real (not stubbed) implementation.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::parser::ParsedRequest;

const FIND_DIR: &str = "find";
const UPLOADS_DIR: &str = "uploads";
const STREAM_CHUNK: usize = 1024;
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn is_find_path(path: &str) -> bool {
    path.starts_with("/find/")
}

pub fn is_files_path(path: &str) -> bool {
    path.starts_with("/files/")
}

/// `PUT /find/<relpath>`: body is everything after the header/body
/// separator, written as a truncating create at `./find/<relpath>`.
pub async fn handle_put_find(
    client: &mut TcpStream,
    request: &ParsedRequest,
) -> Result<(), ProxyError> {
    let relpath = request
        .path
        .strip_prefix("/find/")
        .ok_or_else(|| ProxyError::MalformedRequest("not a /find/ path".into()))?;
    let target = safe_join(FIND_DIR, relpath)?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
        set_dir_mode(parent).await;
    }

    let body = request.body.as_deref().unwrap_or(&[]);
    fs::write(&target, body).await?;
    set_file_mode(&target).await;

    info!(path = %target.display(), bytes = body.len(), "wrote find/ entry");

    let response = b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    client.write_all(response).await.map_err(|_| ProxyError::ClientGone)?;
    Ok(())
}

/// `GET /find/<relpath>`: 404 if missing, otherwise a `text/plain` body
/// streamed in small chunks.
pub async fn handle_get_find(
    client: &mut TcpStream,
    request: &ParsedRequest,
) -> Result<(), ProxyError> {
    let relpath = request
        .path
        .strip_prefix("/find/")
        .ok_or_else(|| ProxyError::MalformedRequest("not a /find/ path".into()))?;
    let target = safe_join(FIND_DIR, relpath)?;
    stream_file(client, &target, "text/plain", None).await
}

/// `GET /files/<relpath>`: like `/find/` but as an `application/octet-stream`
/// attachment download.
pub async fn handle_get_files(
    client: &mut TcpStream,
    request: &ParsedRequest,
) -> Result<(), ProxyError> {
    let relpath = request
        .path
        .strip_prefix("/files/")
        .ok_or_else(|| ProxyError::MalformedRequest("not a /files/ path".into()))?;
    let target = PathBuf::from(relpath);
    let basename = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    stream_file(client, &target, "application/octet-stream", Some(&basename)).await
}

/// POST upload to an arbitrary path: the request body is written to
/// `./uploads/<basename>`, truncated at [`MAX_UPLOAD_BYTES`].
pub async fn handle_upload(
    client: &mut TcpStream,
    request: &ParsedRequest,
) -> Result<(), ProxyError> {
    let basename = Path::new(&request.path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProxyError::MalformedRequest("no filename in upload path".into()))?;

    fs::create_dir_all(UPLOADS_DIR).await?;
    let target = Path::new(UPLOADS_DIR).join(&basename);

    let mut body = request.body.as_deref().unwrap_or(&[]);
    if body.len() > MAX_UPLOAD_BYTES {
        warn!(path = %target.display(), "upload truncated at cap");
        body = &body[..MAX_UPLOAD_BYTES];
    }
    fs::write(&target, body).await?;

    info!(path = %target.display(), bytes = body.len(), "stored upload");

    let html = format!(
        "<html><body><h1>File Upload</h1><p>Stored {} bytes as {}</p></body></html>",
        body.len(),
        basename,
    );
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{html}",
        html.len(),
    );
    client
        .write_all(response.as_bytes())
        .await
        .map_err(|_| ProxyError::ClientGone)?;
    Ok(())
}

async fn stream_file(
    client: &mut TcpStream,
    path: &Path,
    content_type: &str,
    attachment_filename: Option<&str>,
) -> Result<(), ProxyError> {
    let mut file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(_) => {
            debug!(path = %path.display(), "requested file not found");
            return Err(ProxyError::NotFound(path.display().to_string()));
        }
    };
    let metadata = file.metadata().await?;
    let len = metadata.len();

    let disposition = attachment_filename
        .map(|name| format!("Content-Disposition: attachment; filename=\"{name}\"\r\n"))
        .unwrap_or_default();
    let headers = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\n{disposition}Content-Length: {len}\r\nConnection: close\r\n\r\n"
    );
    client
        .write_all(headers.as_bytes())
        .await
        .map_err(|_| ProxyError::ClientGone)?;

    let mut chunk = [0u8; STREAM_CHUNK];
    loop {
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        client
            .write_all(&chunk[..read])
            .await
            .map_err(|_| ProxyError::ClientGone)?;
    }
    Ok(())
}

/// Joins `relpath` under `root`, rejecting anything that would escape it
/// via `..` components.
fn safe_join(root: &str, relpath: &str) -> Result<PathBuf, ProxyError> {
    let relpath = relpath.trim_start_matches('/');
    if relpath.is_empty() || relpath.split('/').any(|seg| seg == "..") {
        return Err(ProxyError::MalformedRequest(format!(
            "invalid path: {relpath}"
        )));
    }
    Ok(Path::new(root).join(relpath))
}

#[cfg(not(unix))]
async fn set_file_mode(_path: &Path) {}
#[cfg(not(unix))]
async fn set_dir_mode(_path: &Path) {}

#[cfg(unix)]
async fn set_file_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await;
}

#[cfg(unix)]
async fn set_dir_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await;
}
