//! Data models for Journal

mod location;
mod note;
mod sticker;
mod tag;

pub use location::NoteLocation;
pub use note::{Content, ImageItem, Media, Note, NoteId, VideoItem, VoiceRecord};
pub use sticker::{AnchorTarget, ResolvedAnchor, Sticker, StickerAnchor};
pub use tag::Tag;
