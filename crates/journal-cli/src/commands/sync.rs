use std::sync::Arc;

use journal_core::state::{FailureKind, SyncState};
use journal_core::sync::{BackupOptions, SyncHandle, SyncOrchestrator};

use crate::commands::common::{build_drive_client, format_sync_state, Workspace};
use crate::error::CliError;

pub async fn run_backup(metadata_only: bool, workspace: &Workspace) -> Result<(), CliError> {
    let orchestrator = orchestrator(workspace).await?;
    let handle = orchestrator
        .start_backup(BackupOptions {
            update_media_files: !metadata_only,
        })
        .ok_or(CliError::SyncBusy)?;
    follow("Backup", handle).await
}

pub async fn run_restore(workspace: &Workspace) -> Result<(), CliError> {
    let orchestrator = orchestrator(workspace).await?;
    let handle = orchestrator.start_restore().ok_or(CliError::SyncBusy)?;
    follow("Restore", handle).await
}

async fn orchestrator(workspace: &Workspace) -> Result<SyncOrchestrator, CliError> {
    let db = workspace.open_database().await?;
    let drive = build_drive_client()?;
    Ok(SyncOrchestrator::new(
        db,
        Arc::new(drive),
        workspace.media_library(),
    ))
}

enum Event {
    State(Option<SyncState>),
    Interrupt(std::io::Result<()>),
}

/// Print every state of a pass until it ends. Ctrl-C cancels the pass.
async fn follow(action: &str, mut handle: SyncHandle) -> Result<(), CliError> {
    let mut interrupted = false;
    loop {
        let event = tokio::select! {
            state = handle.next_state() => Event::State(state),
            signal = tokio::signal::ctrl_c(), if !interrupted => Event::Interrupt(signal),
        };

        let state = match event {
            Event::Interrupt(signal) => {
                signal?;
                interrupted = true;
                eprintln!("Cancelling {}...", action.to_lowercase());
                handle.cancel();
                continue;
            }
            Event::State(Some(state)) => state,
            Event::State(None) => break,
        };

        if let SyncState::Failure(failure) = &state {
            let hint = if failure.kind == FailureKind::Authentication {
                " Run `journal auth login` to authorize again."
            } else {
                ""
            };
            return Err(CliError::SyncFailed(format!(
                "{action} failed: {}.{hint}",
                failure.message
            )));
        }
        if let Some(line) = format_sync_state(action, &state) {
            println!("{line}");
        }
    }
    Ok(())
}
