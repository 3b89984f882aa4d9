//! Error types for the auth service

use std::io;

use thiserror::Error;

/// Result type alias for the auth service
pub type Result<T> = std::result::Result<T, Error>;

/// Auth service errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (includes missing or unreadable TLS material)
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS setup or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Malformed AMQP encoding
    #[error("Codec error: {0}")]
    Codec(String),

    /// Peer did not follow the AMQP connection sequence
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// SASL negotiation failed (client side)
    #[error("SASL error: {0}")]
    Sasl(String),

    /// Operation did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether this error is a fatal startup condition rather than a
    /// per-connection failure.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Tls(_))
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}
