//! Tag model

use serde::{Deserialize, Serialize};

/// A tag for organizing notes.
///
/// The title is the identity: unique across the note set and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub title: String,
}

impl Tag {
    /// Create a tag with the given title, kept verbatim apart from trimming.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into().trim().to_string(),
        }
    }
}
