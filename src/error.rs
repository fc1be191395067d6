//! Error types for setu-plc

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// setu-plc error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file write error
    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Malformed socket address in configuration
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// Frame length exceeds the wire protocol limit
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
