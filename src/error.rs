//! # Error Types
//!
//! Custom error types for Tank Bridge using `thiserror`.
//!
//! Nothing in the bridge is fatal: these errors are logged by the control
//! loop and the affected cycle is skipped.

use thiserror::Error;

/// Main error type for Tank Bridge
#[derive(Debug, Error)]
pub enum TankBridgeError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Persistent configuration store errors
    #[error("Configuration store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No sensor serial port found (tried: {0})")]
    SerialPortNotFound(String),

    /// Network link or broker session not ready
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(&'static str),

    /// The broker client refused or failed to queue a message
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Radio driver errors
    #[error("Radio error: {0}")]
    Radio(String),

    /// Unrecognised diagnostic command line
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Tank Bridge
pub type Result<T> = std::result::Result<T, TankBridgeError>;
