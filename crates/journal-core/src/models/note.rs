//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

use super::{NoteLocation, Sticker, Tag};

/// A unique identifier for a note.
///
/// Fresh ids are UUID v7 (time-sortable), but any non-empty string restored
/// from a backup is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Note ID cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A still image attached to a media block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    /// Filename-derived id; doubles as the remote object name.
    pub id: String,
    /// Local file location.
    pub uri: String,
    /// Width divided by height.
    pub ratio: f64,
    /// When the item was added (Unix ms).
    pub added_date: i64,
}

/// A video clip attached to a media block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    /// Filename-derived id; doubles as the remote object name.
    pub id: String,
    /// Local file location.
    pub uri: String,
    /// Width divided by height.
    pub ratio: f64,
    /// When the item was added (Unix ms).
    pub added_date: i64,
    /// Clip length in milliseconds.
    pub duration_ms: i64,
}

/// One item of a media block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Media {
    Image(ImageItem),
    Video(VideoItem),
}

impl Media {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Image(image) => &image.id,
            Self::Video(video) => &video.id,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        match self {
            Self::Image(image) => &image.uri,
            Self::Video(video) => &video.uri,
        }
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        match self {
            Self::Image(image) => image.uri = uri.into(),
            Self::Video(video) => video.uri = uri.into(),
        }
    }
}

/// A recorded voice clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceRecord {
    /// Filename-derived id; doubles as the remote object name.
    pub id: String,
    /// Local file location.
    pub uri: String,
    /// Clip length in milliseconds.
    pub duration_ms: i64,
    /// Normalized amplitude envelope (0.0..=1.0) used to draw the waveform.
    pub volume_samples: Vec<f32>,
}

/// A content block of a note, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Title { id: String, text: String },
    Media { id: String, media: Vec<Media> },
    Voice(VoiceRecord),
}

impl Content {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Title { id, .. } | Self::Media { id, .. } => id,
            Self::Voice(voice) => &voice.id,
        }
    }
}

/// A journal note with all of its child records assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Journal date (Unix ms)
    pub date: i64,
    /// Ordered content blocks
    pub content: Vec<Content>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub stickers: Vec<Sticker>,
    #[serde(default)]
    pub font: Option<String>,
    #[serde(default)]
    pub background_id: Option<i64>,
    #[serde(default)]
    pub mood_id: Option<i64>,
    #[serde(default)]
    pub location: Option<NoteLocation>,
}

impl Note {
    /// Create an empty note dated now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NoteId::new(),
            date: chrono::Utc::now().timestamp_millis(),
            content: Vec::new(),
            tags: Vec::new(),
            stickers: Vec::new(),
            font: None,
            background_id: None,
            mood_id: None,
            location: None,
        }
    }

    /// All media items across every media block, in display order.
    pub fn media_items(&self) -> impl Iterator<Item = &Media> {
        self.content.iter().flat_map(|block| match block {
            Content::Media { media, .. } => media.iter(),
            _ => [].iter(),
        })
    }

    /// All voice records, in display order.
    pub fn voice_records(&self) -> impl Iterator<Item = &VoiceRecord> {
        self.content.iter().filter_map(|block| match block {
            Content::Voice(voice) => Some(voice),
            _ => None,
        })
    }

    /// Text of every title block joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                Content::Title { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Get first line of text as title preview, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.text()
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str) -> Media {
        Media::Image(ImageItem {
            id: id.to_string(),
            uri: format!("/media/{id}"),
            ratio: 1.5,
            added_date: 10,
        })
    }

    #[test]
    fn test_note_id_unique() {
        let id1 = NoteId::new();
        let id2 = NoteId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_note_id_parse_rejects_empty() {
        assert!("   ".parse::<NoteId>().is_err());
        let parsed: NoteId = " abc ".parse().unwrap();
        assert_eq!(parsed.as_str(), "abc");
    }

    #[test]
    fn media_items_flatten_blocks_in_order() {
        let mut note = Note::new();
        note.content = vec![
            Content::Media {
                id: "m1".to_string(),
                media: vec![image("a.jpg"), image("b.jpg")],
            },
            Content::Title {
                id: "t1".to_string(),
                text: "between".to_string(),
            },
            Content::Media {
                id: "m2".to_string(),
                media: vec![image("c.jpg")],
            },
        ];

        let ids: Vec<&str> = note.media_items().map(Media::id).collect();
        assert_eq!(ids, vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn content_serializes_as_tagged_union() {
        let block = Content::Title {
            id: "t1".to_string(),
            text: "Hello".to_string(),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "title");

        let block = Content::Media {
            id: "m1".to_string(),
            media: vec![image("a.jpg")],
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["media"][0]["kind"], "image");
    }

    #[test]
    fn test_title_preview() {
        let mut note = Note::new();
        note.content = vec![Content::Title {
            id: "t1".to_string(),
            text: "First line\nSecond line".to_string(),
        }];
        assert_eq!(note.title_preview(50), "First line");
        assert_eq!(note.title_preview(5), "First");
    }
}
