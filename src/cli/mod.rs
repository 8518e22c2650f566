//! CLI entry point for Hearth.

pub mod auth;

use clap::{Parser, Subcommand};

/// Hearth session CLI
#[derive(Parser, Debug)]
#[command(name = "hearth", version, about = "Hearth session and API CLI")]
pub struct Cli {
    /// Optional TOML config file; environment variables still override it
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Session management
    Auth(AuthArgs),
    /// Send an authenticated GET request and print the body
    Get(GetArgs),
}

/// Arguments for the `auth` subcommand group.
#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

/// Auth subcommands.
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Log in with email; the password is read from HEARTH_PASSWORD
    Login(LoginArgs),
    /// Create an account; the password is read from HEARTH_PASSWORD
    Register(RegisterArgs),
    /// Show session status
    Status,
    /// Clear the stored session
    Logout,
}

/// Arguments for `hearth auth login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    pub email: String,
}

/// Arguments for `hearth auth register`.
#[derive(Parser, Debug)]
pub struct RegisterArgs {
    pub email: String,

    /// Display name for the new account
    #[arg(short, long)]
    pub name: Option<String>,
}

/// Arguments for `hearth get`.
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Endpoint path, e.g. /families/7/feed
    pub path: String,
}
