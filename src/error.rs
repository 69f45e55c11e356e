//! Error types for the Mathesis corpus-learning pipeline
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.

use thiserror::Error;

/// Main error type for Mathesis operations
#[derive(Error, Debug)]
pub enum MathesisError {
    /// Relational store operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Vector index operation failed
    #[error("Vector index error: {0}")]
    Index(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Invalid feedback or entry ID format
    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    /// Feedback row not found
    #[error("Feedback not found: {0}")]
    FeedbackNotFound(String),

    /// Corpus entry not found
    #[error("Corpus entry not found: {0}")]
    EntryNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Input failed validation (bad rating, missing correction, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid state transition or operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error (remote embedding endpoint)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Mathesis operations
pub type Result<T> = std::result::Result<T, MathesisError>;

/// Convert anyhow::Error to MathesisError
impl From<anyhow::Error> for MathesisError {
    fn from(err: anyhow::Error) -> Self {
        MathesisError::Other(err.to_string())
    }
}
