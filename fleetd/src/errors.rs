//! Error types for fleetd

use thiserror::Error;

/// Main error type for fleetd
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Periphery responded {status}: {body}")]
    PeripheryError { status: u16, body: String },

    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Invalid flag '{flag}' for {kind}")]
    InvalidFlag { kind: String, flag: String },

    #[error("Resource not registered: {0}")]
    UnregisteredResource(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
