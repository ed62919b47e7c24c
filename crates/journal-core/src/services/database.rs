//! Shared database service wrapper used across clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use libsql::Connection;
use tokio::sync::{Mutex, MutexGuard};

use crate::db::{Database, LibSqlNoteRepository, NoteRepository};
use crate::models::Note;
use crate::reconcile::{self, NoteDiff, NoteUpdate};
use crate::{NoteId, Result};

/// Thread-safe service for DB and repository operations.
///
/// Every write goes through [`DatabaseService::with_transaction`], which holds
/// the connection lock for the whole transaction, so at most one writer
/// commits at a time.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh store is
    /// created in its place.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {error}. Starting from an empty store.",
                    db_path.display()
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .map_or_else(|| "journal.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        // WAL and shared-memory sidecars belong to the old file
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale database sidecar {}", path.display());
            }
        }

        Ok(())
    }

    /// Lock the connection, first rolling back any transaction left open by
    /// a writer whose future was dropped mid-body.
    async fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        if !conn.is_autocommit() {
            tracing::warn!("Rolling back a transaction abandoned by a cancelled writer");
            conn.execute("ROLLBACK", ()).await?;
        }
        Ok(db)
    }

    /// Run `body` inside one write transaction.
    ///
    /// Commits when `body` returns `Ok`, rolls back every write when it
    /// returns `Err`. A transaction left open by a caller whose future was
    /// dropped mid-body is rolled back before the next one begins.
    pub async fn with_transaction<T, F>(&self, body: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let db = self.lock().await?;
        let conn = db.connection();

        conn.execute("BEGIN IMMEDIATE", ()).await?;

        match body(conn).await {
            Ok(value) => {
                if let Err(error) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(error.into());
                }
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = conn.execute("ROLLBACK", ()).await {
                    tracing::error!("Rollback failed after {error}: {rollback_error}");
                }
                Err(error)
            }
        }
    }

    /// List notes newest-first.
    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        let db = self.lock().await?;
        let repo = LibSqlNoteRepository::new(db.connection());
        repo.list().await
    }

    /// Fetch a note by id.
    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.lock().await?;
        let repo = LibSqlNoteRepository::new(db.connection());
        repo.get(id).await
    }

    /// Delete a note with all of its child rows, then drop orphaned tags.
    pub async fn delete_note(&self, id: &NoteId) -> Result<()> {
        let note_id = id.clone();
        self.with_transaction(move |conn| {
            Box::pin(async move { LibSqlNoteRepository::new(conn).delete(&note_id).await })
        })
        .await?;

        self.collect_unused_tags().await?;
        Ok(())
    }

    /// List tags and counts.
    pub async fn list_tags(&self) -> Result<Vec<(String, usize)>> {
        let db = self.lock().await?;
        let repo = LibSqlNoteRepository::new(db.connection());
        repo.list_tags().await
    }

    /// Bring the persisted note in line with `update`.
    pub async fn reconcile_note(&self, id: &NoteId, update: NoteUpdate) -> Result<NoteDiff> {
        reconcile::reconcile(self, id, update).await
    }

    /// Delete every tag without a note. Runs outside any write transaction.
    pub(crate) async fn collect_unused_tags(&self) -> Result<u64> {
        let db = self.lock().await?;
        let repo = LibSqlNoteRepository::new(db.connection());
        let removed = repo.collect_unused_tags().await?;
        if removed > 0 {
            tracing::debug!("Removed {removed} unused tags");
        }
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) async fn execute_for_test(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(sql, ()).await?;
        Ok(())
    }
}
