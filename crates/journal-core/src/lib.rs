//! journal-core - Core library for Journal
//!
//! This crate contains the note models, the local store with transactional
//! content reconciliation, and the cloud-drive backup used by every Journal
//! host.

pub mod archive;
pub mod auth;
pub mod config;
pub mod db;
pub mod drive;
pub mod error;
pub mod media;
pub mod models;
pub mod reconcile;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use models::{Note, NoteId};
pub use reconcile::{NoteDiff, NoteUpdate};
pub use services::DatabaseService;
pub use state::{SyncFailure, SyncProgress, SyncState};
pub use sync::{BackupOptions, SyncHandle, SyncOrchestrator};
