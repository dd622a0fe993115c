//! Cyber Hunter CLI - a command-line client for the Cyber Hunter community API.
//!
//! Sessions persist between invocations in the OS keychain (or an encrypted
//! file with `--file-store`) and are refreshed transparently when the access
//! token expires.

mod cli;

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cyberhunter_core::api::{ApiError, CyberHunterApi, SessionClient};
use cyberhunter_core::auth::{CredentialStore, EncryptedFileCredentialStore, KeyringCredentialStore};
use cyberhunter_core::config::{Config, CredentialBackend};
use cyberhunter_core::models::{unread_count, NewAccount};

use cli::{Cli, Commands};

/// Environment variable holding the encrypted file store passphrase
const PASSPHRASE_ENV: &str = "CYBERHUNTER_STORE_PASSPHRASE";

/// Prefix for the rolling log file
const LOG_FILE: &str = "cyberhunter.log";

/// Initialize the tracing subscriber for logging.
/// The returned guard must be held until exit so the file writer flushes.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=cyberhunter_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ApiError>() {
                Some(ApiError::SessionExpired) => {
                    eprintln!("Your session has expired, please log in again (cyberhunter login).")
                }
                Some(ApiError::Unauthorized) => {
                    eprintln!("Not logged in. Run `cyberhunter login` first.")
                }
                _ => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;

    // Command-line overrides apply to this run only and are never saved
    let mut effective = config.clone();
    if let Some(url) = cli.api_url {
        effective.api_base_url = Some(url);
    }
    if cli.file_store {
        effective.credential_backend = CredentialBackend::File;
    }

    let store = open_store(effective.credential_backend)?;
    let client = SessionClient::new(effective.client_config()?, store)?;
    match client.restore() {
        Ok(true) => debug!("Restored stored session"),
        Ok(false) => debug!("No stored session"),
        Err(e) => warn!(error = %e, "Could not read stored session"),
    }
    let api = CyberHunterApi::new(Arc::new(client));
    info!(base_url = %effective.base_url(), "Cyber Hunter CLI starting");

    match cli.command {
        Commands::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt_line("Email: ")?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let outcome = api.login(&email, &password).await?;

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            match outcome.user {
                Some(user) => {
                    eprintln!("Logged in as {}", user.display_handle());
                    print_json(&user)?;
                }
                None => eprintln!("Logged in"),
            }
        }
        Commands::Signup { name, email, username } => {
            let password = rpassword::prompt_password("Choose a password: ")?;
            let account = NewAccount {
                name,
                email: email.clone(),
                password,
                username,
            };
            let outcome = api.signup(&account).await?;

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            eprintln!("Account created");
            if let Some(user) = outcome.user {
                print_json(&user)?;
            }
        }
        Commands::Logout => {
            api.sign_out()?;
            eprintln!("Logged out");
        }
        Commands::Whoami => print_json(&api.fetch_profile().await?)?,
        Commands::Teams => print_json(&api.fetch_teams().await?)?,
        Commands::Team { id } => print_json(&api.fetch_team(&id).await?)?,
        Commands::Join { id } => {
            api.join_team(&id).await?;
            eprintln!("Joined team {}", id);
        }
        Commands::Leave { id } => {
            api.leave_team(&id).await?;
            eprintln!("Left team {}", id);
        }
        Commands::Projects => print_json(&api.fetch_projects().await?)?,
        Commands::Notifications => print_json(&api.fetch_notifications().await?)?,
        Commands::Read { id } => {
            api.mark_notification_read(&id).await?;
            eprintln!("Marked {} as read", id);
        }
        Commands::Leaderboard => print_json(&api.fetch_leaderboard().await?)?,
        Commands::Overview => {
            let overview = api.fetch_overview().await?;
            print_json(&json!({
                "profile": overview.profile,
                "unreadCount": unread_count(&overview.notifications),
                "notifications": overview.notifications,
                "leaderboard": overview.leaderboard,
            }))?;
        }
    }

    Ok(())
}

fn open_store(backend: CredentialBackend) -> Result<Arc<dyn CredentialStore>> {
    match backend {
        CredentialBackend::Keyring => Ok(Arc::new(KeyringCredentialStore::new())),
        CredentialBackend::File => {
            let passphrase = match std::env::var(PASSPHRASE_ENV) {
                Ok(passphrase) if !passphrase.is_empty() => passphrase,
                _ => rpassword::prompt_password("Credential store passphrase: ")?,
            };
            let store = EncryptedFileCredentialStore::in_dir(&Config::data_dir()?, &passphrase)
                .context("Failed to open encrypted credential store")?;
            debug!(path = %store.path().display(), "Using encrypted file credential store");
            Ok(Arc::new(store))
        }
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{}", prompt);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        anyhow::bail!("No input given");
    }
    Ok(line)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
