use journal_core::config::DriveConfig;

use crate::cli::AuthCommands;
use crate::commands::common::{build_authenticator, normalize_content, prompt_line};
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands) -> Result<(), CliError> {
    let authenticator = build_authenticator(&DriveConfig::from_env()?)?;

    match command {
        AuthCommands::Login { code } => {
            let code = if let Some(code) = code.as_deref().and_then(normalize_content) {
                code
            } else {
                let state = uuid::Uuid::now_v7().simple().to_string();
                println!("Open this URL to authorize Journal:\n");
                println!("{}\n", authenticator.oauth().authorization_url(&state));
                normalize_content(&prompt_line("Authorization code: ")?)
                    .ok_or_else(|| CliError::Config("No authorization code entered".to_string()))?
            };

            let session = authenticator.sign_in(&code).await?;
            let email = session
                .account
                .as_ref()
                .and_then(|account| account.email.as_deref())
                .unwrap_or("(no email)");
            println!("Signed in as {email}");
            Ok(())
        }
        AuthCommands::Status => {
            match authenticator.session().await {
                Some(session) => {
                    let email = session
                        .account
                        .as_ref()
                        .and_then(|account| account.email.as_deref())
                        .unwrap_or("(no email)");
                    let state = if session.is_expired() {
                        "expired, refreshes on next use"
                    } else {
                        "valid"
                    };
                    println!(
                        "Signed in as {email} (access token {state}, expires_at={})",
                        session.expires_at
                    );
                }
                None => println!("Not signed in."),
            }
            Ok(())
        }
        AuthCommands::Logout => {
            authenticator.sign_out().await?;
            println!("Signed out");
            Ok(())
        }
    }
}
