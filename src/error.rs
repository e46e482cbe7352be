//! Error types for the notebook client

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Usage Errors (raised before any network activity) ===
    #[error("{0}")]
    Usage(String),

    // === Transport Errors ===
    #[error("Failed to connect to notebook server at {addr}. Is the server running?")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection error: {0}")]
    Transport(#[source] io::Error),

    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    // === Protocol Errors ===
    #[error("Malformed response from server: {line}")]
    Protocol {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Response has no string 'type' field: {0}")]
    MissingType(String),

    #[error("Response line exceeds {0} bytes without a newline")]
    LineTooLong(usize),

    #[error("Response is not valid UTF-8")]
    InvalidUtf8(#[source] std::string::FromUtf8Error),

    // === Encoding Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid signing key: {0}")]
    Signing(String),
}

impl Error {
    /// Create a usage error
    pub fn usage<S: Into<String>>(message: S) -> Self {
        Self::Usage(message.into())
    }

    /// Create a protocol error for a line that failed to parse
    pub fn protocol(line: &str, source: serde_json::Error) -> Self {
        Self::Protocol {
            line: line.to_string(),
            source,
        }
    }
}
