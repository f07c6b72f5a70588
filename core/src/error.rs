use thiserror::Error;

/// Image Warden error types
#[derive(Error, Debug)]
pub enum WardenError {
    /// Invalid run or cloud configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A single image definition is unusable and was skipped
    #[error("Definition error: {image} - {message}")]
    DefinitionError { image: String, message: String },

    /// Image import did not reach the active state
    #[error("Import failed: {image} - {message}")]
    ImportError { image: String, message: String },

    /// Image registry request failed
    #[error("Registry error: {operation} - {message}")]
    RegistryError { operation: String, message: String },

    /// Identity service authentication failed
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Outbound HTTP request failed
    #[error("HTTP error: {url} - {message}")]
    HttpError { url: String, message: String },

    /// Mirror pipeline error
    #[error("Mirror error: {0}")]
    MirrorError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for WardenError {
    fn from(err: serde_yaml::Error) -> Self {
        WardenError::SerializationError(err.to_string())
    }
}

/// Result type alias for Image Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
