//! M-net Link Error Types
//!
//! Core error types shared by the protocol core and its transports.

use thiserror::Error;

/// Result type for mnet-comlink operations
pub type Result<T> = std::result::Result<T, MnetError>;

/// M-net communication errors
#[derive(Debug, Error, Clone)]
pub enum MnetError {
    /// Channel read/write error, connection lost
    #[error("Transport error: {0}")]
    Transport(String),

    /// Deadline expired awaiting a reply
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No SOH/EOT where expected, truncated frame, broken escape sequence
    #[error("Bad framing: {0}")]
    BadFraming(String),

    /// Frame structurally valid but CRC mismatch
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{found:04X}")]
    BadCrc { expected: u16, found: u16 },

    /// LEN field disagrees with the dequoted payload length
    #[error("Bad length: declared {declared}, got {actual}")]
    BadLength { declared: usize, actual: usize },

    /// Payload exceeds the single-byte LEN field
    #[error("Frame too large: {0} payload bytes (max 255)")]
    FrameTooLarge(usize),

    /// Reply packet type is not the expected pair of the request
    #[error("Wrong reply type: expected 0x{expected:04X}, got 0x{got:04X}")]
    WrongReplyType { expected: u16, got: u16 },

    /// Operation requires a prior successful login
    #[error("Not logged in")]
    Unauthenticated,

    /// Login rejected by the controller
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// DataID/averaging combination rejected by the controller
    #[error("Unsupported averaging: {0}")]
    UnsupportedAveraging(String),

    /// Any other server-side error payload or malformed reply body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Client is in the broken state, reset() required
    #[error("Client not ready")]
    NotReady,

    /// Deadline fired or the operation was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for MnetError {
    fn from(err: std::io::Error) -> Self {
        MnetError::Transport(err.to_string())
    }
}

// Helper methods for creating errors
impl MnetError {
    pub fn transport(msg: impl Into<String>) -> Self {
        MnetError::Transport(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        MnetError::Timeout(msg.into())
    }

    pub fn bad_framing(msg: impl Into<String>) -> Self {
        MnetError::BadFraming(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        MnetError::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        MnetError::Config(msg.into())
    }

    /// Whether the per-operation retry loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MnetError::Timeout(_)
                | MnetError::BadCrc { .. }
                | MnetError::BadFraming(_)
                | MnetError::BadLength { .. }
                | MnetError::WrongReplyType { .. }
        )
    }

    /// Whether this error indicates the underlying channel is gone
    pub fn is_transport(&self) -> bool {
        matches!(self, MnetError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MnetError::timeout("no reply").is_retryable());
        assert!(MnetError::BadCrc {
            expected: 0x57A4,
            found: 0x0000
        }
        .is_retryable());
        assert!(MnetError::WrongReplyType {
            expected: 0x0C29,
            got: 0x0C2B
        }
        .is_retryable());

        assert!(!MnetError::transport("broken pipe").is_retryable());
        assert!(!MnetError::Unauthenticated.is_retryable());
        assert!(!MnetError::AuthFailed("rejected".into()).is_retryable());
    }

    #[test]
    fn test_io_error_maps_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: MnetError = io.into();
        assert!(err.is_transport());
        assert!(!err.is_retryable());
    }
}
