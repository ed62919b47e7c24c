//! Content reconciliation
//!
//! Brings a note's persisted child rows (media, voice, tags, stickers and
//! location) in line with an edited in-memory note. Every write of one call
//! lands in a single transaction; orphaned tags are collected after commit.

mod diff;

use std::collections::HashSet;

use libsql::Connection;

pub use diff::DiffSet;

use crate::db::{encode_layout, LibSqlNoteRepository, NoteRow};
use crate::error::{Error, Result};
use crate::models::{Content, Media, Note, NoteId, NoteLocation, Sticker, Tag, VoiceRecord};
use crate::services::DatabaseService;

/// Desired final state of a note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteUpdate {
    pub date: i64,
    pub content: Vec<Content>,
    pub tags: Vec<Tag>,
    pub stickers: Vec<Sticker>,
    pub font: Option<String>,
    pub background_id: Option<i64>,
    pub mood_id: Option<i64>,
    pub location: Option<NoteLocation>,
    /// When false, media and voice rows are left as they are.
    pub update_media_files: bool,
}

impl NoteUpdate {
    /// Desired state equal to `note`.
    #[must_use]
    pub fn from_note(note: Note, update_media_files: bool) -> Self {
        Self {
            date: note.date,
            content: note.content,
            tags: note.tags,
            stickers: note.stickers,
            font: note.font,
            background_id: note.background_id,
            mood_id: note.mood_id,
            location: note.location,
            update_media_files,
        }
    }
}

/// Writes applied by one reconciliation, per entity kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteDiff {
    pub media: DiffSet<Media>,
    pub voice: DiffSet<VoiceRecord>,
    pub tags: DiffSet<Tag>,
    pub stickers: DiffSet<Sticker>,
}

impl NoteDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
            && self.voice.is_empty()
            && self.tags.is_empty()
            && self.stickers.is_empty()
    }
}

pub(crate) async fn reconcile(
    service: &DatabaseService,
    note_id: &NoteId,
    update: NoteUpdate,
) -> Result<NoteDiff> {
    validate(&update)?;

    let id = note_id.clone();
    let diff = service
        .with_transaction(move |conn| Box::pin(async move { apply(conn, &id, &update).await }))
        .await?;

    service.collect_unused_tags().await?;

    tracing::debug!(
        "Reconciled note {note_id}: media +{}/-{}, voice +{}/-{}, tags +{}/-{}, stickers +{}/~{}/-{}",
        diff.media.to_insert.len(),
        diff.media.to_delete.len(),
        diff.voice.to_insert.len(),
        diff.voice.to_delete.len(),
        diff.tags.to_insert.len(),
        diff.tags.to_delete.len(),
        diff.stickers.to_insert.len(),
        diff.stickers.to_update.len(),
        diff.stickers.to_delete.len(),
    );
    Ok(diff)
}

/// Reject ids that would make the keyed diff ambiguous.
fn validate(update: &NoteUpdate) -> Result<()> {
    ensure_unique("content block", update.content.iter().map(Content::id))?;
    ensure_unique(
        "media item",
        update
            .content
            .iter()
            .filter_map(|block| match block {
                Content::Media { media, .. } => Some(media),
                _ => None,
            })
            .flatten()
            .map(Media::id),
    )?;
    ensure_unique("tag", update.tags.iter().map(|tag| tag.title.as_str()))?;
    ensure_unique(
        "sticker",
        update.stickers.iter().map(|sticker| sticker.id.as_str()),
    )?;
    Ok(())
}

fn ensure_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput(format!("{kind} id cannot be empty")));
        }
        if !seen.insert(id) {
            return Err(Error::InvalidInput(format!("duplicate {kind} id: {id}")));
        }
    }
    Ok(())
}

async fn apply(conn: &Connection, id: &NoteId, update: &NoteUpdate) -> Result<NoteDiff> {
    let repo = LibSqlNoteRepository::new(conn);

    let (media, voice) = if update.update_media_files {
        let desired_media: Vec<Media> = update
            .content
            .iter()
            .filter_map(|block| match block {
                Content::Media { media, .. } => Some(media),
                _ => None,
            })
            .flatten()
            .cloned()
            .collect();
        let desired_voice: Vec<VoiceRecord> = update
            .content
            .iter()
            .filter_map(|block| match block {
                Content::Voice(voice) => Some(voice.clone()),
                _ => None,
            })
            .collect();

        (
            diff::by_key(repo.load_media(id).await?, &desired_media, |item| {
                item.id().to_string()
            }),
            diff::by_key(repo.load_voice(id).await?, &desired_voice, |voice| {
                voice.id.clone()
            }),
        )
    } else {
        (DiffSet::default(), DiffSet::default())
    };

    let tags = diff::by_key(repo.load_tags(id).await?, &update.tags, |tag| {
        tag.title.clone()
    });
    let stickers =
        diff::by_key_with_updates(repo.load_stickers(id).await?, &update.stickers, |sticker| {
            sticker.id.clone()
        });

    // Parent row first so child inserts satisfy their foreign keys
    repo.upsert_row(
        id,
        &NoteRow {
            date: update.date,
            layout: encode_layout(&update.content)?,
            font: update.font.clone(),
            background_id: update.background_id,
            mood_id: update.mood_id,
        },
    )
    .await?;

    for item in &media.to_insert {
        repo.insert_media(id, item).await?;
    }
    for voice_record in &voice.to_insert {
        repo.insert_voice(id, voice_record).await?;
    }
    for tag in &tags.to_insert {
        repo.link_tag(id, tag).await?;
    }
    for sticker in &stickers.to_insert {
        repo.insert_sticker(id, sticker).await?;
    }
    for sticker in &stickers.to_update {
        repo.update_sticker(id, sticker).await?;
    }

    for item in &media.to_delete {
        repo.delete_media(id, item).await?;
    }
    for voice_record in &voice.to_delete {
        repo.delete_voice(id, voice_record).await?;
    }
    for tag in &tags.to_delete {
        repo.unlink_tag(id, tag).await?;
    }
    for sticker in &stickers.to_delete {
        repo.delete_sticker(id, sticker).await?;
    }

    match &update.location {
        Some(location) => repo.upsert_location(id, location).await?,
        None => repo.delete_location(id).await?,
    }

    Ok(NoteDiff {
        media,
        voice,
        tags,
        stickers,
    })
}
