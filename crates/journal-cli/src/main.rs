//! Journal CLI - keep a journal from the terminal and back it up to the drive.

mod auth;
mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::Workspace;
use crate::commands::completions::run_completions;
use crate::commands::delete::run_delete;
use crate::commands::list::{run_list, run_tags};
use crate::commands::sync::{run_backup, run_restore};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "journal=info"
            .parse()
            .map_err(|error| CliError::Config(format!("Invalid log directive: {error}")))?,
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let workspace = Workspace::resolve(cli.db_path, cli.media_dir)?;
    match cli.command {
        Commands::Add(args) => run_add(args, &workspace).await,
        Commands::List { limit, tag, json } => {
            run_list(limit, tag.as_deref(), json, &workspace).await
        }
        Commands::Delete { id } => run_delete(&id, &workspace).await,
        Commands::Tags { json } => run_tags(json, &workspace).await,
        Commands::Auth { command } => run_auth(command).await,
        Commands::Backup { metadata_only } => run_backup(metadata_only, &workspace).await,
        Commands::Restore => run_restore(&workspace).await,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
    }
}
