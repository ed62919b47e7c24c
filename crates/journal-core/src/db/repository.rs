//! Note repository implementation

use std::collections::HashMap;

use libsql::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{
    Content, ImageItem, Media, Note, NoteId, NoteLocation, Sticker, StickerAnchor, Tag, VideoItem,
    VoiceRecord,
};

/// Trait for note storage operations (async)
#[allow(async_fn_in_trait)]
pub trait NoteRepository {
    /// Get a fully assembled note by ID
    async fn get(&self, id: &NoteId) -> Result<Option<Note>>;

    /// List every note, newest first
    async fn list(&self) -> Result<Vec<Note>>;

    /// Check whether a note row exists
    async fn exists(&self, id: &NoteId) -> Result<bool>;

    /// Delete a note; child rows cascade
    async fn delete(&self, id: &NoteId) -> Result<()>;

    /// Get all tags with note counts
    async fn list_tags(&self) -> Result<Vec<(String, usize)>>;

    /// Delete tags no note refers to any more. Returns the number removed.
    async fn collect_unused_tags(&self) -> Result<u64>;
}

/// Block order as stored in `notes.content`.
///
/// Child rows hold item data only; placement lives here so that reordering
/// never touches child rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockLayout {
    Title { id: String, text: String },
    Media { id: String, items: Vec<String> },
    Voice { id: String },
}

/// Serialize the ordered block layout of `content`.
pub(crate) fn encode_layout(content: &[Content]) -> Result<String> {
    let layout = content
        .iter()
        .map(|block| match block {
            Content::Title { id, text } => BlockLayout::Title {
                id: id.clone(),
                text: text.clone(),
            },
            Content::Media { id, media } => BlockLayout::Media {
                id: id.clone(),
                items: media.iter().map(|item| item.id().to_string()).collect(),
            },
            Content::Voice(voice) => BlockLayout::Voice {
                id: voice.id.clone(),
            },
        })
        .collect::<Vec<_>>();
    Ok(serde_json::to_string(&layout)?)
}

/// Scalar columns of a note row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NoteRow {
    pub date: i64,
    pub layout: String,
    pub font: Option<String>,
    pub background_id: Option<i64>,
    pub mood_id: Option<i64>,
}

/// libSQL implementation of `NoteRepository`
pub struct LibSqlNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn load_row(&self, id: &NoteId) -> Result<Option<NoteRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT date, content, font, background_id, mood_id FROM notes WHERE id = ?",
                params![id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        Ok(Some(NoteRow {
            date: row.get(0)?,
            layout: row.get(1)?,
            font: row.get(2)?,
            background_id: row.get(3)?,
            mood_id: row.get(4)?,
        }))
    }

    /// Insert or update the scalar columns of a note.
    pub(crate) async fn upsert_row(&self, id: &NoteId, note: &NoteRow) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT INTO notes (id, date, content, font, background_id, mood_id, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    date = excluded.date,
                    content = excluded.content,
                    font = excluded.font,
                    background_id = excluded.background_id,
                    mood_id = excluded.mood_id,
                    updated_at = excluded.updated_at",
                params![
                    id.as_str(),
                    note.date,
                    note.layout.as_str(),
                    note.font.clone(),
                    note.background_id,
                    note.mood_id,
                    now
                ],
            )
            .await?;
        Ok(())
    }

    /// Load image and video rows of a note, unordered.
    pub(crate) async fn load_media(&self, id: &NoteId) -> Result<Vec<Media>> {
        let mut media = Vec::new();

        let mut rows = self
            .conn
            .query(
                "SELECT id, uri, ratio, added_date FROM images WHERE note_id = ?",
                params![id.as_str()],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            media.push(Media::Image(ImageItem {
                id: row.get(0)?,
                uri: row.get(1)?,
                ratio: row.get(2)?,
                added_date: row.get(3)?,
            }));
        }

        let mut rows = self
            .conn
            .query(
                "SELECT id, uri, ratio, added_date, duration_ms FROM videos WHERE note_id = ?",
                params![id.as_str()],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            media.push(Media::Video(VideoItem {
                id: row.get(0)?,
                uri: row.get(1)?,
                ratio: row.get(2)?,
                added_date: row.get(3)?,
                duration_ms: row.get(4)?,
            }));
        }

        Ok(media)
    }

    pub(crate) async fn insert_media(&self, id: &NoteId, item: &Media) -> Result<()> {
        match item {
            Media::Image(image) => {
                self.conn
                    .execute(
                        "INSERT INTO images (id, note_id, uri, ratio, added_date) VALUES (?, ?, ?, ?, ?)",
                        params![
                            image.id.as_str(),
                            id.as_str(),
                            image.uri.as_str(),
                            image.ratio,
                            image.added_date
                        ],
                    )
                    .await?;
            }
            Media::Video(video) => {
                self.conn
                    .execute(
                        "INSERT INTO videos (id, note_id, uri, ratio, added_date, duration_ms)
                         VALUES (?, ?, ?, ?, ?, ?)",
                        params![
                            video.id.as_str(),
                            id.as_str(),
                            video.uri.as_str(),
                            video.ratio,
                            video.added_date,
                            video.duration_ms
                        ],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn delete_media(&self, id: &NoteId, item: &Media) -> Result<()> {
        let table = match item {
            Media::Image(_) => "images",
            Media::Video(_) => "videos",
        };
        self.conn
            .execute(
                &format!("DELETE FROM {table} WHERE id = ? AND note_id = ?"),
                params![item.id(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn load_voice(&self, id: &NoteId) -> Result<Vec<VoiceRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, uri, duration_ms, volume_samples FROM voice_records WHERE note_id = ?",
                params![id.as_str()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_voice(&row)?);
        }
        Ok(records)
    }

    fn parse_voice(row: &Row) -> Result<VoiceRecord> {
        let samples: String = row.get(3)?;
        Ok(VoiceRecord {
            id: row.get(0)?,
            uri: row.get(1)?,
            duration_ms: row.get(2)?,
            volume_samples: serde_json::from_str(&samples)?,
        })
    }

    pub(crate) async fn insert_voice(&self, id: &NoteId, voice: &VoiceRecord) -> Result<()> {
        let samples = serde_json::to_string(&voice.volume_samples)?;
        self.conn
            .execute(
                "INSERT INTO voice_records (id, note_id, uri, duration_ms, volume_samples)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    voice.id.as_str(),
                    id.as_str(),
                    voice.uri.as_str(),
                    voice.duration_ms,
                    samples
                ],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn delete_voice(&self, id: &NoteId, voice: &VoiceRecord) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM voice_records WHERE id = ? AND note_id = ?",
                params![voice.id.as_str(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn load_tags(&self, id: &NoteId) -> Result<Vec<Tag>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tag_title FROM note_tags WHERE note_id = ? ORDER BY tag_title",
                params![id.as_str()],
            )
            .await?;

        let mut tags = Vec::new();
        while let Some(row) = rows.next().await? {
            tags.push(Tag {
                title: row.get(0)?,
            });
        }
        Ok(tags)
    }

    pub(crate) async fn link_tag(&self, id: &NoteId, tag: &Tag) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO tags (title) VALUES (?)",
                params![tag.title.as_str()],
            )
            .await?;
        self.conn
            .execute(
                "INSERT INTO note_tags (note_id, tag_title) VALUES (?, ?)",
                params![id.as_str(), tag.title.as_str()],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn unlink_tag(&self, id: &NoteId, tag: &Tag) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM note_tags WHERE note_id = ? AND tag_title = ?",
                params![id.as_str(), tag.title.as_str()],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn load_stickers(&self, id: &NoteId) -> Result<Vec<Sticker>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, type_id, scale, rotation, flip, anchors, edit_time
                 FROM stickers WHERE note_id = ? ORDER BY edit_time, id",
                params![id.as_str()],
            )
            .await?;

        let mut stickers = Vec::new();
        while let Some(row) = rows.next().await? {
            let anchors: String = row.get(5)?;
            stickers.push(Sticker {
                id: row.get(0)?,
                type_id: row.get(1)?,
                scale: row.get(2)?,
                rotation: row.get(3)?,
                flip: row.get::<i32>(4)? != 0,
                anchors: serde_json::from_str::<Vec<StickerAnchor>>(&anchors)?,
                edit_time: row.get(6)?,
            });
        }
        Ok(stickers)
    }

    pub(crate) async fn insert_sticker(&self, id: &NoteId, sticker: &Sticker) -> Result<()> {
        let anchors = serde_json::to_string(&sticker.anchors)?;
        self.conn
            .execute(
                "INSERT INTO stickers (id, note_id, type_id, scale, rotation, flip, anchors, edit_time)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    sticker.id.as_str(),
                    id.as_str(),
                    sticker.type_id,
                    sticker.scale,
                    sticker.rotation,
                    i32::from(sticker.flip),
                    anchors,
                    sticker.edit_time
                ],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn update_sticker(&self, id: &NoteId, sticker: &Sticker) -> Result<()> {
        let anchors = serde_json::to_string(&sticker.anchors)?;
        let rows = self
            .conn
            .execute(
                "UPDATE stickers
                 SET type_id = ?, scale = ?, rotation = ?, flip = ?, anchors = ?, edit_time = ?
                 WHERE id = ? AND note_id = ?",
                params![
                    sticker.type_id,
                    sticker.scale,
                    sticker.rotation,
                    i32::from(sticker.flip),
                    anchors,
                    sticker.edit_time,
                    sticker.id.as_str(),
                    id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("sticker {}", sticker.id)));
        }
        Ok(())
    }

    pub(crate) async fn delete_sticker(&self, id: &NoteId, sticker: &Sticker) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM stickers WHERE id = ? AND note_id = ?",
                params![sticker.id.as_str(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn load_location(&self, id: &NoteId) -> Result<Option<NoteLocation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, lat, lng FROM note_locations WHERE note_id = ?",
                params![id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(NoteLocation {
            id: row.get(0)?,
            title: row.get(1)?,
            lat: row.get(2)?,
            lng: row.get(3)?,
        }))
    }

    pub(crate) async fn upsert_location(&self, id: &NoteId, location: &NoteLocation) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO note_locations (id, note_id, title, lat, lng) VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(note_id) DO UPDATE SET
                    id = excluded.id,
                    title = excluded.title,
                    lat = excluded.lat,
                    lng = excluded.lng",
                params![
                    location.id.as_str(),
                    id.as_str(),
                    location.title.as_str(),
                    location.lat,
                    location.lng
                ],
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn delete_location(&self, id: &NoteId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM note_locations WHERE note_id = ?",
                params![id.as_str()],
            )
            .await?;
        Ok(())
    }

    /// Rebuild the ordered content from the stored layout and child rows.
    fn assemble_content(
        layout: &str,
        media: Vec<Media>,
        voice: Vec<VoiceRecord>,
    ) -> Result<Vec<Content>> {
        let layout: Vec<BlockLayout> = serde_json::from_str(layout)?;
        let mut media: HashMap<String, Media> = media
            .into_iter()
            .map(|item| (item.id().to_string(), item))
            .collect();
        let mut voice: HashMap<String, VoiceRecord> = voice
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let mut content = Vec::with_capacity(layout.len());
        for block in layout {
            match block {
                BlockLayout::Title { id, text } => content.push(Content::Title { id, text }),
                BlockLayout::Media { id, items } => {
                    let items = items
                        .iter()
                        .filter_map(|item_id| {
                            let item = media.remove(item_id);
                            if item.is_none() {
                                tracing::warn!("Media item {item_id} missing for block {id}");
                            }
                            item
                        })
                        .collect();
                    content.push(Content::Media { id, media: items });
                }
                BlockLayout::Voice { id } => match voice.remove(&id) {
                    Some(record) => content.push(Content::Voice(record)),
                    None => tracing::warn!("Voice record {id} missing from layout"),
                },
            }
        }
        Ok(content)
    }
}

impl NoteRepository for LibSqlNoteRepository<'_> {
    async fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        let Some(row) = self.load_row(id).await? else {
            return Ok(None);
        };

        let media = self.load_media(id).await?;
        let voice = self.load_voice(id).await?;
        let content = Self::assemble_content(&row.layout, media, voice)?;

        Ok(Some(Note {
            id: id.clone(),
            date: row.date,
            content,
            tags: self.load_tags(id).await?,
            stickers: self.load_stickers(id).await?,
            font: row.font,
            background_id: row.background_id,
            mood_id: row.mood_id,
            location: self.load_location(id).await?,
        }))
    }

    async fn list(&self) -> Result<Vec<Note>> {
        let mut rows = self
            .conn
            .query("SELECT id FROM notes ORDER BY date DESC, id", ())
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            ids.push(id.parse::<NoteId>()?);
        }

        let mut notes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(note) = self.get(&id).await? {
                notes.push(note);
            }
        }
        Ok(notes)
    }

    async fn exists(&self, id: &NoteId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM notes WHERE id = ?)",
                params![id.as_str()],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i32>(0)? != 0,
            None => false,
        })
    }

    async fn delete(&self, id: &NoteId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?", params![id.as_str()])
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<(String, usize)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT t.title, COUNT(nt.note_id) AS count
                 FROM tags t
                 LEFT JOIN note_tags nt ON t.title = nt.tag_title
                 GROUP BY t.title
                 ORDER BY count DESC, t.title ASC",
                (),
            )
            .await?;

        let mut tags = Vec::new();
        while let Some(row) = rows.next().await? {
            let count: i64 = row.get(1)?;
            tags.push((row.get::<String>(0)?, usize::try_from(count).unwrap_or(0)));
        }
        Ok(tags)
    }

    async fn collect_unused_tags(&self) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM tags WHERE title NOT IN (SELECT tag_title FROM note_tags)",
                (),
            )
            .await?;
        Ok(removed)
    }
}
