//! Note location model

use serde::{Deserialize, Serialize};

/// Place a note was written at. At most one per note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteLocation {
    pub id: String,
    pub title: String,
    pub lat: f64,
    pub lng: f64,
}
