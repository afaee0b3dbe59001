//! Unified error handling for the client runtime.

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Engine error: {0}")]
    Engine(#[from] sitesync_engine::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session token was rejected; enqueue is blocked until it is renewed
    #[error("Session expired")]
    SessionExpired,

    #[error("Corrupt local state: {0}")]
    Corrupt(String),

    /// The engine task has stopped
    #[error("Engine closed")]
    Closed,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
