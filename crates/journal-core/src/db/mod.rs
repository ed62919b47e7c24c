//! Database layer for Journal

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{LibSqlNoteRepository, NoteRepository};
pub(crate) use repository::{encode_layout, NoteRow};
