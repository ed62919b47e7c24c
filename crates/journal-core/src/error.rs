//! Error types for journal-core

use thiserror::Error;

use crate::auth::AuthError;

/// Result type alias using journal-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in journal-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local media storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transport-level HTTP failure (timeout, connection reset, ...)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the remote object store
    #[error("Remote store returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    /// Authentication failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Operation cancelled by the host
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the host should prompt the user to authorize again.
    pub const fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Auth(AuthError::Unauthorized(_) | AuthError::NotConfigured)
        )
    }
}
