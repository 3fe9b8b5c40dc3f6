//! CLI subcommand: `localguard audit`
//!
//! Lists, verifies and clears the hash-chained audit ledger.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::{open_app, require_session};
use crate::app::App;
use crate::config::Config;
use crate::security::AuditEvent;

#[derive(Args)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommands,
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Show audit events, oldest first
    Show {
        /// Show at most this many of the most recent events
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Only events by this subject
        #[arg(long)]
        actor: Option<String>,

        /// Only events with this action (e.g., user.login)
        #[arg(long)]
        action: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify chain integrity
    Verify,

    /// Delete all audit events (requires system:admin)
    Clear,
}

pub async fn run(args: AuditArgs, config: Config) -> Result<()> {
    match args.command {
        AuditCommands::Show {
            limit,
            actor,
            action,
            json,
        } => show(config, limit, actor, action, json).await,
        AuditCommands::Verify => verify(config).await,
        AuditCommands::Clear => clear(config).await,
    }
}

async fn show(
    config: Config,
    limit: usize,
    actor: Option<String>,
    action: Option<String>,
    json_output: bool,
) -> Result<()> {
    let app = open_app(config).await?;

    // Verify chain integrity on the full ledger, then filter
    let broken = app.audit.verify().await;
    let all = app.audit.recent(usize::MAX).await;

    let mut entries: Vec<(usize, &AuditEvent)> = all
        .iter()
        .enumerate()
        .filter(|(_, e)| actor.as_deref().is_none_or(|a| e.user_id == a))
        .filter(|(_, e)| action.as_deref().is_none_or(|a| e.action == a))
        .collect();
    let skip = entries.len().saturating_sub(limit);
    entries.drain(..skip);

    if entries.is_empty() {
        if actor.is_some() || action.is_some() {
            println!("No audit events matching filter.");
        } else {
            println!("No audit events.");
        }
        return Ok(());
    }

    if json_output {
        let events: Vec<&AuditEvent> = entries.iter().map(|(_, e)| *e).collect();
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    println!("Audit Log ({} of {} events):", entries.len(), all.len());
    println!();
    for (i, event) in &entries {
        let chain_status = if broken.contains(i) {
            " [CHAIN BROKEN]"
        } else {
            ""
        };
        let role = event
            .details
            .get("userRole")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let hash = event
            .chain
            .as_ref()
            .map(|c| short_hash(&c.hash))
            .unwrap_or("-");
        println!(
            "  {} {} on {} by {} ({}) sha256: {}{}",
            event.timestamp, event.action, event.resource, event.user_id, role, hash, chain_status
        );
    }

    println!();
    print_integrity(&broken);
    Ok(())
}

async fn verify(config: Config) -> Result<()> {
    let app = open_app(config).await?;
    let count = app.audit.len().await;
    let broken = app.audit.verify().await;

    println!("Verified {} event(s).", count);
    print_integrity(&broken);
    if !broken.is_empty() {
        anyhow::bail!("Audit chain is broken");
    }
    Ok(())
}

async fn clear(config: Config) -> Result<()> {
    let app = open_app(config).await?;
    let count = clear_ledger(&app).await?;
    println!("Cleared {} audit event(s).", count);
    Ok(())
}

/// Clear the ledger for a live session. Returns the number of events removed.
async fn clear_ledger(app: &App) -> Result<usize> {
    require_session(app).await?;
    let count = app.audit.len().await;
    app.clear_audit().await?;
    Ok(count)
}

/// First 16 characters of a stored hash. Tampered ledgers may hold any text.
fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(16) {
        Some((end, _)) => &hash[..end],
        None => hash,
    }
}

fn print_integrity(broken: &[usize]) {
    if broken.is_empty() {
        println!("Chain integrity: INTACT");
    } else {
        let positions: Vec<String> = broken.iter().map(|i| i.to_string()).collect();
        println!(
            "Chain integrity: BROKEN at {} position(s): {}",
            broken.len(),
            positions.join(", ")
        );
    }
}
