use crate::commands::common::{
    filter_by_tag, format_note_lines, note_to_list_item, NoteListItem, Workspace,
};
use crate::error::CliError;

pub async fn run_list(
    limit: usize,
    tag: Option<&str>,
    as_json: bool,
    workspace: &Workspace,
) -> Result<(), CliError> {
    let db = workspace.open_database().await?;
    let mut notes = filter_by_tag(db.list_notes().await?, tag);
    notes.truncate(limit);

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_tags(as_json: bool, workspace: &Workspace) -> Result<(), CliError> {
    let db = workspace.open_database().await?;
    let tags = db.list_tags().await?;

    if as_json {
        let items: Vec<serde_json::Value> = tags
            .iter()
            .map(|(title, count)| serde_json::json!({ "title": title, "notes": count }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for (title, count) in tags {
            println!("#{title:<24}  {count}");
        }
    }
    Ok(())
}
