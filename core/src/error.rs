use thiserror::Error;

/// Errors raised by the coordinator and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Master file empty and pool auto-detection inconclusive (fatal at startup)
    #[error("No Redis master could be determined from the configured pool")]
    NoRedisMaster,

    /// Redis command or connection failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Master file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload serialization or parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Control bus publish or subscribe failed
    #[error("Bus error: {0}")]
    Bus(String),

    /// A Redis command or connection attempt exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a bus error
    pub fn bus(msg: impl Into<String>) -> Self {
        Self::Bus(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;
