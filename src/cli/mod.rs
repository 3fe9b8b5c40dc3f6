pub mod audit;
pub mod config;
pub mod monitor;
pub mod paths;
pub mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::app::App;
use crate::security::{SessionCheck, TracingNotifier};

#[derive(Parser)]
#[command(name = "localguard")]
#[command(
    author,
    version,
    about = "Offline access control and tamper-evident audit for local state"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "LOCALGUARD_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in offline as a known subject
    Login(session::LoginArgs),

    /// Sign out and clear session records
    Logout,

    /// Show identity, session and lockout state
    Status,

    /// Check a permission for the current identity
    Check(session::CheckArgs),

    /// Change the current role (requires role:manage)
    Role(session::RoleArgs),

    /// Inspect or verify the audit log
    Audit(audit::AuditArgs),

    /// Run the session and lockout monitors until Ctrl-C
    ///
    /// Holds the instance lock while running; other commands against the
    /// same state directory are refused until it exits.
    Monitor,

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}

/// Build the application state with a log-only notification sink.
pub async fn open_app(config: crate::config::Config) -> Result<App> {
    App::init(config, Arc::new(TracingNotifier)).await
}

/// Fail unless a signed-in identity with a live session exists.
///
/// An expired session is logged out as a side effect.
pub async fn require_session(app: &App) -> Result<()> {
    match app.session.validate().await {
        SessionCheck::Active => Ok(()),
        SessionCheck::NoIdentity => anyhow::bail!("Not signed in. Run `localguard login <subject>`."),
        SessionCheck::Missing | SessionCheck::Expired => {
            anyhow::bail!("Session expired. Run `localguard login <subject>`.")
        }
    }
}
