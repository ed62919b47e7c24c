//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version >= CURRENT_VERSION {
        return Ok(());
    }

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    tracing::debug!("Database schema is at version {CURRENT_VERSION}");
    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply a batch of statements atomically
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            libsql::params![version],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: notes, tags and media
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // Notes; `content` holds the ordered block layout as JSON
            "CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                date INTEGER NOT NULL,
                content TEXT NOT NULL,
                font TEXT,
                background_id INTEGER,
                mood_id INTEGER,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_notes_date ON notes(date DESC)",
            // Tags are identified by their case-sensitive title
            "CREATE TABLE IF NOT EXISTS tags (
                title TEXT PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS note_tags (
                note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                tag_title TEXT NOT NULL REFERENCES tags(title) ON DELETE CASCADE,
                PRIMARY KEY (note_id, tag_title)
            )",
            "CREATE INDEX IF NOT EXISTS idx_note_tags_tag ON note_tags(tag_title)",
            "CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                uri TEXT NOT NULL,
                ratio REAL NOT NULL,
                added_date INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_images_note_id ON images(note_id)",
            "CREATE TABLE IF NOT EXISTS videos (
                id TEXT PRIMARY KEY,
                note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                uri TEXT NOT NULL,
                ratio REAL NOT NULL,
                added_date INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_videos_note_id ON videos(note_id)",
            "CREATE TABLE IF NOT EXISTS voice_records (
                id TEXT PRIMARY KEY,
                note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                uri TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                volume_samples TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_voice_records_note_id ON voice_records(note_id)",
        ],
    )
    .await
}

/// Migration to version 2: stickers and locations
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS stickers (
                id TEXT PRIMARY KEY,
                note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                type_id INTEGER NOT NULL,
                scale REAL NOT NULL,
                rotation REAL NOT NULL,
                flip INTEGER NOT NULL DEFAULT 0,
                anchors TEXT NOT NULL,
                edit_time INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_stickers_note_id ON stickers(note_id)",
            "CREATE TABLE IF NOT EXISTS note_locations (
                id TEXT PRIMARY KEY,
                note_id TEXT NOT NULL UNIQUE REFERENCES notes(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL
            )",
        ],
    )
    .await
}

/// Migration to version 3: sticker and location ids are scoped to their note
async fn migrate_v3(conn: &Connection) -> Result<()> {
    apply(
        conn,
        3,
        &[
            "CREATE TABLE stickers_v3 (
                id TEXT NOT NULL,
                note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                type_id INTEGER NOT NULL,
                scale REAL NOT NULL,
                rotation REAL NOT NULL,
                flip INTEGER NOT NULL DEFAULT 0,
                anchors TEXT NOT NULL,
                edit_time INTEGER NOT NULL,
                PRIMARY KEY (note_id, id)
            )",
            "INSERT INTO stickers_v3 (id, note_id, type_id, scale, rotation, flip, anchors, edit_time)
             SELECT id, note_id, type_id, scale, rotation, flip, anchors, edit_time FROM stickers",
            "DROP TABLE stickers",
            "ALTER TABLE stickers_v3 RENAME TO stickers",
            "CREATE TABLE note_locations_v3 (
                note_id TEXT PRIMARY KEY REFERENCES notes(id) ON DELETE CASCADE,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL
            )",
            "INSERT INTO note_locations_v3 (note_id, id, title, lat, lng)
             SELECT note_id, id, title, lat, lng FROM note_locations",
            "DROP TABLE note_locations",
            "ALTER TABLE note_locations_v3 RENAME TO note_locations",
        ],
    )
    .await
}
