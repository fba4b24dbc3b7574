//! Error handling for the BlueChat CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("BlueChat error: {0}")]
    Core(#[from] bluechat_core::BluechatError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Chat history error: {0}")]
    Storage(String),

    #[error("Peer {0} was not found nearby")]
    PeerNotSeen(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<CliError> for bluechat_core::BluechatError {
    fn from(err: CliError) -> Self {
        match err {
            CliError::Core(inner) => inner,
            other => bluechat_core::BluechatError::storage_error(other.to_string()),
        }
    }
}
