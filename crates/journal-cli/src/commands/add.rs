use journal_core::models::{Content, Media, Tag};
use journal_core::{Note, NoteUpdate};
use uuid::Uuid;

use crate::cli::AddArgs;
use crate::commands::common::{resolve_note_text, Workspace};
use crate::error::CliError;

pub async fn run_add(args: AddArgs, workspace: &Workspace) -> Result<(), CliError> {
    let text = resolve_note_text(&args.text, args.has_attachments())?;
    let note = build_note(text, &args, workspace).await?;
    if note.content.is_empty() && note.tags.is_empty() {
        return Err(CliError::EmptyContent);
    }

    let db = workspace.open_database().await?;
    let id = note.id.clone();
    db.reconcile_note(&id, NoteUpdate::from_note(note, true))
        .await?;

    println!("{id}");
    Ok(())
}

/// Assemble a note, copying attachments into the media library.
pub async fn build_note(
    text: Option<String>,
    args: &AddArgs,
    workspace: &Workspace,
) -> Result<Note, CliError> {
    let library = workspace.media_library();
    let mut note = Note::new();

    if let Some(text) = text {
        note.content.push(Content::Title {
            id: Uuid::now_v7().to_string(),
            text,
        });
    }

    let mut media = Vec::new();
    for image in &args.images {
        media.push(Media::Image(library.import_image(image).await?));
    }
    for video in &args.videos {
        media.push(Media::Video(
            library
                .import_video(video, args.video_ratio, args.video_duration_ms)
                .await?,
        ));
    }
    if !media.is_empty() {
        note.content.push(Content::Media {
            id: Uuid::now_v7().to_string(),
            media,
        });
    }

    if let Some(voice) = &args.voice {
        note.content
            .push(Content::Voice(library.import_voice(voice).await?));
    }

    for title in &args.tags {
        let tag = Tag::new(title.as_str());
        if !tag.title.is_empty() && !note.tags.contains(&tag) {
            note.tags.push(tag);
        }
    }

    note.mood_id = args.mood;
    note.background_id = args.background;
    note.font.clone_from(&args.font);
    Ok(note)
}
