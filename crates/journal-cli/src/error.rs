use std::io;

use journal_core::auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] journal_core::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Nothing to add: provide text, a tag, media or a voice recording")]
    EmptyContent,
    #[error("Note ID cannot be empty")]
    EmptyNoteId,
    #[error("Note not found for id/prefix: {0}")]
    NoteNotFound(String),
    #[error("{0}")]
    AmbiguousNoteId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Drive backup is not configured. Set JOURNAL_OAUTH_CLIENT_ID and JOURNAL_OAUTH_REDIRECT_URI, then run `journal auth login`."
    )]
    BackupNotConfigured,
    #[error("Another backup or restore is already running")]
    SyncBusy,
    #[error("{0}")]
    SyncFailed(String),
}
