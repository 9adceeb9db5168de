//! Client error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Registration error the server reports when the device is over quota.
pub const TOO_MANY_REGISTRATIONS: &str = "TOO_MANY_REGISTRATIONS";

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] mcs_protocol::ProtocolError),

    #[error("storage error: {0}")]
    Storage(#[from] mcs_storage::StorageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("connection timeout")]
    Timeout,

    #[error("client stopped")]
    Stopped,

    #[error("no device credentials; run checkin first")]
    NotCheckedIn,

    #[error("checkin failed: {0}")]
    Checkin(String),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("registration response did not contain a token")]
    MissingToken,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::TlsHandshake(_) => true,
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::Registration(code) => code != TOO_MANY_REGISTRATIONS,
            _ => false,
        }
    }
}
