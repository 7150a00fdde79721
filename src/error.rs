//! Lifecycle errors returned by [`TimeServer`](crate::server::TimeServer).
//!
//! Errors inside a single client session or in the accept loop are logged
//! where they happen and never surface here.

use tokio::task::JoinError;

/// Errors returned from `start` and `stop`
#[derive(Debug)]
pub enum ServerError {
    /// `start` was called on a running server
    AlreadyRunning,
    /// `stop` was called on a server that is not running
    NotRunning,
    /// The listening socket could not be bound
    Bind {
        address: String,
        source: std::io::Error,
    },
    /// The acceptor task owning the listener did not shut down cleanly
    Close(JoinError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::AlreadyRunning => write!(f, "server already running"),
            ServerError::NotRunning => write!(f, "server not running"),
            ServerError::Bind { address, source } => {
                write!(f, "could not start server on {}: {}", address, source)
            }
            ServerError::Close(e) => write!(f, "error closing listener: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Close(e) => Some(e),
            _ => None,
        }
    }
}
