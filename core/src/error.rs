/// Error types for the chat sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not connected: cannot emit '{0}'")]
    NotConnected(String),

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Acknowledgement timeout: {0}")]
    AckTimeout(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Engine has been disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
