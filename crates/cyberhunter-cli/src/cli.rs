//! CLI argument definitions for the Cyber Hunter client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Cyber Hunter community client
#[derive(Parser, Debug)]
#[command(name = "cyberhunter", version, about = "Cyber Hunter community client")]
pub struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, global = true, env = "CYBERHUNTER_API_URL", value_name = "URL")]
    pub api_url: Option<String>,

    /// Keep tokens in a passphrase-encrypted file instead of the OS keychain
    #[arg(long, global = true)]
    pub file_store: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in with email and password
    Login {
        /// Account email (defaults to the last one used)
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Create an account
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in profile
    Whoami,
    /// List teams
    Teams,
    /// Show one team
    Team { id: String },
    /// Join a team
    Join { id: String },
    /// Leave a team
    Leave { id: String },
    /// List projects
    Projects,
    /// List notifications
    Notifications,
    /// Mark a notification as read
    Read { id: String },
    /// Show the leaderboard
    Leaderboard,
    /// Profile, notifications and leaderboard in one call
    Overview,
}
