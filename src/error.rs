//! Error handling for the meterbridge crate.

/// A specialized `Result` type for meterbridge operations.
pub type Result<T> = std::result::Result<T, MeterError>;

/// The main error type for meterbridge operations.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Log or payload parsing failed
    #[error("Failed to parse data: {0}")]
    Parse(String),

    /// Network operation failed
    #[error("Network error: {0}")]
    Network(String),

    /// Relay server error
    #[error("Relay server error: {0}")]
    Relay(String),

    /// Local storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MeterError {
    /// Create a new parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new network error
    pub fn network_error(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new relay server error
    pub fn relay_error(msg: impl Into<String>) -> Self {
        Self::Relay(msg.into())
    }

    /// Create a new storage error
    pub fn storage_error(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
