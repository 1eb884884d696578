//! Gateway error types

use thiserror::Error;

/// Gateway, codec and NNTP protocol errors
#[derive(Error, Debug)]
pub enum GateError {
    /// IO error during network or file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure connection
    #[error("TLS error: {0}")]
    Tls(String),

    /// Network operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid response from the news server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// NNTP protocol error with response code
    #[error("NNTP error {code}: {message}")]
    Protocol {
        /// NNTP response code (e.g., 411, 430, 441)
        code: u16,
        /// Error message from server
        message: String,
    },

    /// NNTP authentication failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Posting not permitted
    #[error("Posting not permitted")]
    PostingNotPermitted,

    /// Posting failed
    #[error("Posting failed: {0}")]
    PostingFailed(String),

    /// No such newsgroup
    #[error("No such newsgroup: {0}")]
    NoSuchGroup(String),

    /// Malformed packet header; the file is quarantined, never retried
    #[error("Invalid packet header: {0}")]
    InvalidHeader(String),

    /// Packet ended in the middle of a message record
    #[error("Truncated message: {0}")]
    TruncatedMessage(String),

    /// Invalid FidoNet address string
    #[error("Invalid FidoNet address: {0}")]
    InvalidAddress(String),

    /// Configuration error; fatal to the current phase only
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hold store / notification state (de)serialization error
    #[error("Persistence error: {0}")]
    Persist(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl GateError {
    /// Transient network conditions are recovered by a bounded reconnect;
    /// everything else aborts the current item or phase.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GateError::Timeout | GateError::ConnectionClosed | GateError::Io(_)
        )
    }
}

/// Result type alias using GateError
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GateError::Timeout.is_transient());
        assert!(GateError::ConnectionClosed.is_transient());
        assert!(!GateError::PostingNotPermitted.is_transient());
        assert!(
            !GateError::Protocol {
                code: 441,
                message: "rejected".to_string()
            }
            .is_transient()
        );
    }
}
