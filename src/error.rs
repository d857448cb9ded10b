use thiserror::Error;

/// Error kinds a worker can surface while servicing one connection.
///
/// Every variant maps to exactly one outcome on the client socket (see
/// [`ProxyError::status_code`]); the mapping never leaves the worker.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream timed out")]
    UpstreamTimeout,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("client gone")]
    ClientGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// The HTTP status this error becomes on the wire, if any.
    ///
    /// `UpstreamTimeout` and `ClientGone` return `None`: per spec these are
    /// silent terminations, not synthesized responses (the first leaves
    /// whatever was already streamed on the wire, the second has no one
    /// left to write to).
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProxyError::MalformedRequest(_) => Some(400),
            ProxyError::UnsupportedMethod(_) => Some(405),
            ProxyError::UpstreamUnreachable(_) => Some(502),
            ProxyError::ResourceExhausted(_) => Some(500),
            ProxyError::NotFound(_) => Some(404),
            ProxyError::UpstreamTimeout | ProxyError::ClientGone => None,
            ProxyError::Io(_) => Some(500),
        }
    }
}
