use crate::commands::common::{resolve_note, Workspace};
use crate::error::CliError;

pub async fn run_delete(id: &str, workspace: &Workspace) -> Result<(), CliError> {
    let db = workspace.open_database().await?;
    let note = resolve_note(id, &db).await?;

    db.delete_note(&note.id).await?;
    println!("{}", note.id);
    Ok(())
}
