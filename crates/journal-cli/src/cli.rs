use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "journal")]
#[command(about = "Keep a journal from the command line and back it up to your drive")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional directory holding note media
    #[arg(long, global = true, value_name = "DIR")]
    pub media_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add(AddArgs),
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Filter notes by tag title
        #[arg(long)]
        tag: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an existing note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// List tags with their note counts
    Tags {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Authorize access to the drive
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Back up every note and its media to the drive
    Backup {
        /// Upload notes only; media already on the drive is not re-sent
        #[arg(long)]
        metadata_only: bool,
    },
    /// Restore notes and media from the drive
    Restore,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct AddArgs {
    /// Note text
    pub text: Vec<String>,
    /// Tag to attach (repeatable)
    #[arg(long = "tag", value_name = "TITLE")]
    pub tags: Vec<String>,
    /// Image file to attach (repeatable)
    #[arg(long = "image", value_name = "PATH")]
    pub images: Vec<PathBuf>,
    /// Video file to attach (repeatable)
    #[arg(long = "video", value_name = "PATH")]
    pub videos: Vec<PathBuf>,
    /// Width divided by height of attached videos
    #[arg(long, default_value_t = 16.0 / 9.0)]
    pub video_ratio: f64,
    /// Length of attached videos in milliseconds
    #[arg(long, default_value_t = 0)]
    pub video_duration_ms: i64,
    /// WAV recording to attach
    #[arg(long, value_name = "PATH")]
    pub voice: Option<PathBuf>,
    /// Mood identifier
    #[arg(long)]
    pub mood: Option<i64>,
    /// Background identifier
    #[arg(long)]
    pub background: Option<i64>,
    /// Font name
    #[arg(long)]
    pub font: Option<String>,
}

impl AddArgs {
    pub fn has_attachments(&self) -> bool {
        !self.tags.is_empty()
            || !self.images.is_empty()
            || !self.videos.is_empty()
            || self.voice.is_some()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Authorize this machine and store the session in the keychain
    Login {
        /// Authorization code from the consent page; prompted for when omitted
        #[arg(long, value_name = "CODE")]
        code: Option<String>,
    },
    /// Show the authorized account
    Status,
    /// Forget the stored session
    Logout,
}
