//! Domain-specific error types for the line link.
//!
//! Setup-time failures surface as `Result<T, LinkError>`. Failures on a
//! live link (send/receive) are absorbed by the control loops, which close
//! the connection and latch the lost flag instead of returning them.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the line link.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Transport Errors ─────────────────────────────────────────
    /// The host name did not resolve to any usable address.
    #[error("failed to resolve {host}: {source}")]
    ResolutionFailed {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to create a socket for the resolved address family.
    #[error("failed to create socket: {0}")]
    SocketCreateFailed(#[source] std::io::Error),

    /// The TCP connect did not complete.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A write was partial, failed, or exceeded the send timeout.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// The read side of the link reported an error.
    #[error("receive failed: {0}")]
    RecvFailed(#[source] std::io::Error),

    /// No link is currently open.
    #[error("not connected")]
    NotConnected,

    /// The peer stayed silent for longer than the reply timeout.
    #[error("no reply from peer within {0:?}")]
    NoReplyTimeout(Duration),

    // ── Lifecycle Errors ─────────────────────────────────────────
    /// `start` was called before a receive callback was registered.
    #[error("no receive callback registered")]
    MissingReceiveCallback,

    /// The async runtime needed to drive the link is unavailable.
    #[error("transport init failed: {0}")]
    TransportInitFailed(String),

    /// The operation requires a stopped client.
    #[error("client is already running")]
    AlreadyRunning,

    /// A link phase change was requested from the wrong phase.
    #[error("invalid phase transition: {0}")]
    InvalidTransition(&'static str),

    /// Catch-all for I/O errors outside the send/receive paths.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A control loop ended abnormally.
    #[error("task error: {0}")]
    Task(#[from] TaskError),
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error for the spawned control loops.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The loop panicked.
    #[error("{name} loop panicked")]
    Panicked { name: &'static str },

    /// The loop was aborted before it could observe cancellation.
    #[error("{name} loop was cancelled")]
    Cancelled { name: &'static str },
}

impl TaskError {
    /// Classify a `JoinError` from the named loop.
    pub fn from_join(name: &'static str, err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            TaskError::Panicked { name }
        } else {
            TaskError::Cancelled { name }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = LinkError::ResolutionFailed {
            host: "mixer.local".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        };
        assert!(e.to_string().contains("mixer.local"));

        let e = LinkError::NoReplyTimeout(Duration::from_secs(10));
        assert!(e.to_string().contains("10s"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: LinkError = io_err.into();
        assert!(matches!(e, LinkError::Io(_)));
    }

    #[test]
    fn task_error_wraps() {
        let e: LinkError = TaskError::Panicked { name: "receive" }.into();
        assert!(e.to_string().contains("receive loop panicked"));
    }
}
