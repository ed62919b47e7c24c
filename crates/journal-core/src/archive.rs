//! The backup document: every note serialized into one JSON object.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Note;

/// Fixed remote name of the backup document. Each backup replaces it.
pub const NOTES_OBJECT_NAME: &str = "notes.json";
pub const NOTES_MIME_TYPE: &str = "application/json";

/// Current document version.
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupArchive {
    pub version: u32,
    /// When the backup was taken (Unix ms)
    pub exported_at: i64,
    pub notes: Vec<Note>,
}

/// Older backups are a bare array of notes.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredArchive {
    Versioned(BackupArchive),
    Bare(Vec<Note>),
}

impl BackupArchive {
    #[must_use]
    pub fn new(notes: Vec<Note>) -> Self {
        Self {
            version: ARCHIVE_VERSION,
            exported_at: crate::util::unix_timestamp_millis(),
            notes,
        }
    }

    pub fn render(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let archive = match serde_json::from_slice::<StoredArchive>(bytes)? {
            StoredArchive::Versioned(archive) => archive,
            StoredArchive::Bare(notes) => Self {
                version: 0,
                exported_at: 0,
                notes,
            },
        };

        if archive.version > ARCHIVE_VERSION {
            return Err(Error::Serialization(serde::de::Error::custom(format!(
                "backup version {} is newer than supported version {ARCHIVE_VERSION}",
                archive.version
            ))));
        }
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Content, ImageItem, Media, NoteLocation, Sticker, StickerAnchor, Tag, VoiceRecord,
    };
    use pretty_assertions::assert_eq;

    fn full_note() -> Note {
        let mut note = Note::new();
        note.content = vec![
            Content::Title {
                id: "t1".to_string(),
                text: "Ferry day".to_string(),
            },
            Content::Media {
                id: "m1".to_string(),
                media: vec![Media::Image(ImageItem {
                    id: "0191.jpg".to_string(),
                    uri: "/media/0191.jpg".to_string(),
                    ratio: 1.333,
                    added_date: 1_700_000_000_123,
                })],
            },
            Content::Voice(VoiceRecord {
                id: "0192.wav".to_string(),
                uri: "/media/0192.wav".to_string(),
                duration_ms: 2_500,
                volume_samples: vec![0.25, 0.5, 1.0],
            }),
        ];
        note.tags = vec![Tag::new("travel")];
        note.stickers = vec![Sticker {
            id: "s1".to_string(),
            type_id: 4,
            scale: 1.25,
            rotation: -10.0,
            flip: true,
            anchors: vec![StickerAnchor::viewport_default()],
            edit_time: 9,
        }];
        note.mood_id = Some(2);
        note.location = Some(NoteLocation {
            id: "loc".to_string(),
            title: "Pier 4".to_string(),
            lat: 60.39,
            lng: 5.32,
        });
        note
    }

    #[test]
    fn archive_round_trips_every_field() {
        let archive = BackupArchive::new(vec![full_note(), Note::new()]);
        let parsed = BackupArchive::parse(&archive.render().unwrap()).unwrap();
        assert_eq!(parsed, archive);
    }

    #[test]
    fn bare_note_list_is_accepted() {
        let notes = vec![full_note()];
        let bytes = serde_json::to_vec(&notes).unwrap();
        let parsed = BackupArchive::parse(&bytes).unwrap();
        assert_eq!(parsed.notes, notes);
    }

    #[test]
    fn malformed_and_future_documents_are_rejected() {
        assert!(matches!(
            BackupArchive::parse(b"{not json"),
            Err(Error::Serialization(_))
        ));

        let future = serde_json::json!({"version": 99, "exported_at": 0, "notes": []});
        let error = BackupArchive::parse(future.to_string().as_bytes()).unwrap_err();
        assert!(error.to_string().contains("newer"));
    }
}
