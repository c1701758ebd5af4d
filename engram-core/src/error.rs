//! Error types for engram-core

use thiserror::Error;

/// Main error type for the engram-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transcript parse error
    #[error("transcript parse error: {0}")]
    Parse(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Model service error (timeout, quota, missing key)
    #[error("model service error: {0}")]
    Model(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Skill validation or installation error
    #[error("skill error: {0}")]
    Skill(String),
}

/// Result type alias for engram-core
pub type Result<T> = std::result::Result<T, Error>;
