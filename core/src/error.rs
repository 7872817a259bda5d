/// Error types for the inbox core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message source error: {0}")]
    Source(String),
}

pub type Result<T> = std::result::Result<T, InboxError>;
