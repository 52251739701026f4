//! Error types for backhaul

use backhaul_protocol::ControlError;
use thiserror::Error;

/// Main error type for backhaul operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Multiplexed session error
    #[error("Multiplexer error: {0}")]
    Mux(#[from] MuxError),

    /// The retrying stream opener used up its attempts
    #[error("Stream open failed after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: MuxError },

    /// Unrecoverable condition; the owning process must exit
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Control message error
    #[error("Control message error: {0}")]
    Control(#[from] ControlError),
}

impl TunnelError {
    /// Whether this error must terminate the process rather than a single task.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TunnelError::Fatal(_))
    }
}

/// Multiplexed session errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxError {
    /// The session is gone; no further streams can be opened or accepted
    #[error("session closed")]
    SessionClosed,

    /// The per-session stream cap is reached
    #[error("streams exhausted")]
    StreamsExhausted,

    /// Queueing a frame exceeded the session write timeout
    #[error("timed out")]
    Timeout,

    /// Operation not allowed for this side of the session
    #[error("operation not permitted for this session role")]
    WrongRole,
}

impl MuxError {
    /// Errors the stream opener should retry after a short delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MuxError::StreamsExhausted | MuxError::Timeout)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::Protocol("test error".to_string());
        assert!(err.to_string().contains("test error"));

        let err = TunnelError::RetryExhausted {
            attempts: 5,
            last: MuxError::Timeout,
        };
        assert_eq!(
            err.to_string(),
            "Stream open failed after 5 attempts: timed out"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::other("test");
        let tunnel_err: TunnelError = io_err.into();
        assert!(matches!(tunnel_err, TunnelError::Io(_)));

        let tunnel_err: TunnelError = MuxError::SessionClosed.into();
        assert!(matches!(tunnel_err, TunnelError::Mux(MuxError::SessionClosed)));

        let tunnel_err: TunnelError = ControlError::InvalidDomain.into();
        assert!(matches!(tunnel_err, TunnelError::Control(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(MuxError::StreamsExhausted.is_retryable());
        assert!(MuxError::Timeout.is_retryable());
        assert!(!MuxError::SessionClosed.is_retryable());
        assert!(!MuxError::WrongRole.is_retryable());
    }

    #[test]
    fn test_only_fatal_is_fatal() {
        assert!(TunnelError::Fatal("listener closed".into()).is_fatal());
        assert!(!TunnelError::Authentication("bad secret".into()).is_fatal());
    }
}
