//! Locker error types

use gantry_common::ConfigError;
use gantry_consul_client::ClientError;

/// Error type for locker operations
#[derive(Debug, thiserror::Error)]
pub enum LockerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("locker is not initialized")]
    NotInitialized,

    #[error("backend unavailable: {0}")]
    Backend(#[from] ClientError),

    #[error("key '{0}' is held by another session")]
    Contention(String),

    #[error("unknown key '{0}'")]
    UnknownKey(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("lock on '{0}' was lost")]
    LockLost(String),
}

pub type Result<T> = std::result::Result<T, LockerError>;
