use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphiteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for attribute '{name}': {value}")]
    InvalidAttribute { name: String, value: String },

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("Publisher failed to start: {0}")]
    PublisherStart(String),
}

pub type Result<T> = std::result::Result<T, GraphiteError>;
