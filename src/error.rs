//! Error types for Courier
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CourierError
pub type Result<T> = std::result::Result<T, CourierError>;

/// Unified error type for Courier operations
#[derive(Debug, Error)]
pub enum CourierError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid separator: {0}")]
    InvalidSeparator(String),

    // -------------------------------------------------------------------------
    // Framing Errors
    // -------------------------------------------------------------------------
    #[error("Message contains the separator character")]
    SeparatorInMessage,

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Network error: {0}")]
    Network(String),

    // -------------------------------------------------------------------------
    // Application Errors
    // -------------------------------------------------------------------------
    #[error("Handler error: {0}")]
    Handler(String),
}

impl CourierError {
    /// True for faults that mean the peer went away mid-write
    pub fn is_disconnect(&self) -> bool {
        match self {
            CourierError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            CourierError::ConnectionClosed => true,
            _ => false,
        }
    }
}
