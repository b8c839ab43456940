//! Client-specific error types

use hexlink_core::{HexlinkError, HexlinkErrorKind};
use thiserror::Error;

/// Client-specific errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected to server
    #[error("Not connected")]
    NotConnected,

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// No reply arrived in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Request abandoned before a reply arrived
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<ClientError> for HexlinkError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ConnectionFailed(msg) => HexlinkError::network(msg),
            ClientError::NotConnected => HexlinkError::session("Not connected"),
            ClientError::SendFailed(msg) => HexlinkError::network(msg),
            ClientError::Timeout(_msg) => HexlinkError::timeout(),
            ClientError::Cancelled => HexlinkError::cancelled(),
            ClientError::InvalidConfig(msg) => HexlinkError::config(msg),
        }
    }
}

impl From<HexlinkError> for ClientError {
    fn from(err: HexlinkError) -> Self {
        match err.kind() {
            HexlinkErrorKind::Timeout => ClientError::Timeout(err.to_string()),
            HexlinkErrorKind::Cancelled => ClientError::Cancelled,
            HexlinkErrorKind::Config | HexlinkErrorKind::Validation => {
                ClientError::InvalidConfig(err.to_string())
            }
            _ => ClientError::ConnectionFailed(err.to_string()),
        }
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
