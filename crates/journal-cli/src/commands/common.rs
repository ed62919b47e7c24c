use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use journal_core::auth::{OAuthClient, TokenAuthenticator};
use journal_core::config::{DriveConfig, OAuthConfig};
use journal_core::drive::DriveClient;
use journal_core::media::MediaLibrary;
use journal_core::services::DatabaseService;
use journal_core::state::SyncState;
use journal_core::{Note, NoteId};
use serde::Serialize;

use crate::auth::KeyringSessionStore;
use crate::error::CliError;

const DATA_DIR_NAME: &str = "journal";

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub preview: String,
    pub text: String,
    pub date: i64,
    pub relative_time: String,
    pub tags: Vec<String>,
    pub media_count: usize,
    pub voice_count: usize,
    pub mood_id: Option<i64>,
}

/// Paths the CLI works with, resolved once per invocation.
pub struct Workspace {
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
}

impl Workspace {
    pub fn resolve(db_path: Option<PathBuf>, media_dir: Option<PathBuf>) -> Result<Self, CliError> {
        let db_path = match db_path {
            Some(path) => path,
            None => data_dir()?.join("journal.db"),
        };
        let media_dir = match media_dir {
            Some(path) => path,
            None => data_dir()?.join("media"),
        };
        Ok(Self { db_path, media_dir })
    }

    pub async fn open_database(&self) -> Result<DatabaseService, CliError> {
        Ok(DatabaseService::open_path(&self.db_path).await?)
    }

    pub fn media_library(&self) -> MediaLibrary {
        MediaLibrary::new(&self.media_dir)
    }
}

fn data_dir() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve the user data directory".to_string()))
}

/// Authenticator backed by the keychain, or an error when OAuth is not
/// configured in the environment.
pub fn build_authenticator(drive_config: &DriveConfig) -> Result<Arc<TokenAuthenticator>, CliError> {
    let oauth_config = OAuthConfig::from_env()?.ok_or(CliError::BackupNotConfigured)?;
    let oauth = OAuthClient::new(oauth_config, drive_config.http_client()?)?;
    Ok(Arc::new(TokenAuthenticator::new(
        oauth,
        Arc::new(KeyringSessionStore::new()),
    )?))
}

pub fn build_drive_client() -> Result<DriveClient, CliError> {
    let config = DriveConfig::from_env()?;
    let auth = build_authenticator(&config)?;
    Ok(DriveClient::new(config, auth)?)
}

pub async fn resolve_note(query: &str, db: &DatabaseService) -> Result<Note, CliError> {
    let query = normalize_note_identifier(query)?;
    if let Ok(note_id) = query.parse::<NoteId>() {
        if let Some(note) = db.get_note(&note_id).await? {
            return Ok(note);
        }
    }

    let mut matching: Vec<Note> = db
        .list_notes()
        .await?
        .into_iter()
        .filter(|note| note.id.as_str().starts_with(&query))
        .collect();

    match matching.len() {
        0 => Err(CliError::NoteNotFound(query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|note| short_id(&note.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn filter_by_tag(notes: Vec<Note>, tag: Option<&str>) -> Vec<Note> {
    match tag.map(str::trim).filter(|tag| !tag.is_empty()) {
        Some(tag) => notes
            .into_iter()
            .filter(|note| note.tags.iter().any(|candidate| candidate.title == tag))
            .collect(),
        None => notes,
    }
}

fn short_id(id: &NoteId) -> String {
    id.as_str().chars().take(13).collect()
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let short_id = short_id(&note.id);
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.date, now_ms);
            let attachments = render_attachments(note);
            let tags = render_tags(note);

            let mut line = format!("{short_id:<13}  {preview:<40}  {relative_time:<10}");
            for extra in [attachments, tags] {
                if !extra.is_empty() {
                    line.push_str("  ");
                    line.push_str(&extra);
                }
            }
            line.trim_end().to_string()
        })
        .collect()
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    let mut tags: Vec<String> = note.tags.iter().map(|tag| tag.title.clone()).collect();
    tags.sort();

    NoteListItem {
        id: note.id.to_string(),
        preview: note_preview(note, 80),
        text: note.text(),
        date: note.date,
        relative_time: format_relative_time(note.date, now_ms),
        tags,
        media_count: note.media_items().count(),
        voice_count: note.voice_records().count(),
        mood_id: note.mood_id,
    }
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let first_line = note.title_preview(usize::MAX);
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

fn render_attachments(note: &Note) -> String {
    let media = note.media_items().count();
    let voice = note.voice_records().count();
    match (media, voice) {
        (0, 0) => String::new(),
        (media, 0) => format!("[{media} media]"),
        (0, voice) => format!("[{voice} voice]"),
        (media, voice) => format!("[{media} media, {voice} voice]"),
    }
}

pub fn render_tags(note: &Note) -> String {
    let mut tags: Vec<&str> = note.tags.iter().map(|tag| tag.title.as_str()).collect();
    tags.sort_unstable();
    tags.into_iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Terminal line for a sync state. `None` for states with nothing to show.
pub fn format_sync_state(action: &str, state: &SyncState) -> Option<String> {
    match state {
        SyncState::Idle => None,
        SyncState::Running { progress } => Some(format!(
            "{action}: {}/{} notes",
            progress.synced_notes, progress.total_notes
        )),
        SyncState::Success => Some(format!("{action} completed")),
        SyncState::Failure(failure) => Some(format!("{action} failed: {}", failure.message)),
    }
}

pub fn resolve_note_text(text_parts: &[String], allow_empty: bool) -> Result<Option<String>, CliError> {
    if let Some(text) = normalize_content(&text_parts.join(" ")) {
        return Ok(Some(text));
    }

    if let Some(text) = read_piped_stdin()? {
        return Ok(Some(text));
    }

    if allow_empty {
        Ok(None)
    } else {
        Err(CliError::EmptyContent)
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

/// Read one trimmed line from an interactive prompt.
pub fn prompt_line(prompt: &str) -> Result<String, CliError> {
    use std::io::Write;

    let mut stdout = io::stdout();
    write!(stdout, "{prompt}")?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
