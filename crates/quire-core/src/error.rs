use thiserror::Error;

/// Core error type for Quire operations outside the migration engine.
#[derive(Error, Debug)]
pub enum QuireError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<toml::de::Error> for QuireError {
    fn from(e: toml::de::Error) -> Self {
        QuireError::Config(format!("Failed to parse config: {}", e))
    }
}

/// Result type alias using QuireError.
pub type Result<T> = std::result::Result<T, QuireError>;
