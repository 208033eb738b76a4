//! Error types for the tokenwise engine.
//!
//! Most engine failures degrade to "no cache hit" or "no budget available"
//! and never surface here. These variants cover the places where a caller
//! genuinely needs to know: configuration, snapshot I/O, and strategy
//! validation.

use thiserror::Error;

/// Errors produced by the tokenwise library.
#[derive(Debug, Error)]
pub enum TokenwiseError {
    /// The configuration file or an override is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// An admission condition could not be compiled or evaluated.
    #[error("Invalid condition in strategy '{strategy}': {reason}")]
    InvalidCondition { strategy: String, reason: String },

    /// Snapshot read/write failed at the backend level.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TokenwiseError>;
