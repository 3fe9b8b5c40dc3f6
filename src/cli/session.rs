//! CLI subcommands: `login`, `logout`, `status`, `check`, `role`.

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use super::{open_app, require_session};
use crate::config::Config;
use crate::security::{LoginOutcome, Role, find_permission, minutes_ceil};

#[derive(Args)]
pub struct LoginArgs {
    /// Subject to sign in as (e.g., admin)
    pub subject: String,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Permission id (e.g., cheat:create)
    pub permission: String,
}

#[derive(Args)]
pub struct RoleArgs {
    /// New role: user, reseller, developer or admin
    pub role: String,
}

pub async fn login(args: LoginArgs, config: Config) -> Result<()> {
    let app = open_app(config).await?;

    match app.login(&args.subject).await? {
        LoginOutcome::Accepted(subject) => {
            println!(
                "Signed in as {} ({})",
                subject.subject_id,
                subject.role.display_name()
            );
        }
        LoginOutcome::Rejected {
            failed_attempts,
            locked_until: None,
        } => {
            let max = app.offline.settings().max_attempts;
            anyhow::bail!(
                "Unknown subject '{}' ({}/{} failed attempts)",
                args.subject,
                failed_attempts,
                max
            );
        }
        LoginOutcome::Rejected {
            locked_until: Some(until),
            ..
        } => {
            anyhow::bail!(
                "Too many failed attempts. Locked until {}",
                until.with_timezone(&chrono::Local).format("%H:%M")
            );
        }
        LoginOutcome::Locked { remaining, .. } => {
            anyhow::bail!(
                "Too many failed attempts. Try again in {} minutes.",
                minutes_ceil(&remaining)
            );
        }
    }

    Ok(())
}

pub async fn logout(config: Config) -> Result<()> {
    let app = open_app(config).await?;
    let profile = app.identity.current();
    if !profile.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }
    app.logout().await?;
    println!("Signed out {}.", profile.subject_id());
    Ok(())
}

pub async fn status(config: Config) -> Result<()> {
    let app = open_app(config).await?;
    let now = Utc::now();
    let profile = app.identity.current();

    println!("LocalGuard Status:");
    println!();

    if profile.is_authenticated() {
        println!(
            "  Identity:        {} ({})",
            profile.subject_id(),
            profile.permissions.role.display_name()
        );
        println!(
            "  Active:          {}",
            if profile.permissions.is_active { "yes" } else { "no" }
        );
        println!(
            "  Permissions:     {}",
            profile
                .permissions
                .permissions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    } else {
        println!("  Identity:        (not signed in)");
    }

    match app.session.record().await {
        Some(record) => {
            let age = record
                .last_activity_time()
                .map(|t| format_age(now.signed_duration_since(t)))
                .unwrap_or_else(|| "unknown".to_string());
            println!("  Session:         last activity {} ago", age);
        }
        None => println!("  Session:         (none)"),
    }

    match app.offline.record().await {
        Some(record) => {
            println!(
                "  Failed logins:   {}/{}",
                record.failed_attempts,
                app.offline.settings().max_attempts
            );
            match record.lockout_remaining(now) {
                Some(remaining) => println!(
                    "  Lockout:         LOCKED ({} minutes remaining)",
                    minutes_ceil(&remaining)
                ),
                None => println!("  Lockout:         unlocked"),
            }
        }
        None => println!("  Lockout:         unlocked (no offline record)"),
    }

    println!("  Device id:       {}", app.offline.device_id().await);
    println!(
        "  Encryption:      {}",
        if app.store.encryption().is_enabled() {
            "on"
        } else {
            "off"
        }
    );
    println!("  Audit events:    {}", app.audit.len().await);

    Ok(())
}

pub async fn check(args: CheckArgs, config: Config) -> Result<()> {
    let app = open_app(config).await?;
    require_session(&app).await?;

    let profile = app.identity.current();
    let granted = app.identity.has_permission(&args.permission);
    let offline = app.offline.validate_offline_permission(&args.permission);

    let label = find_permission(&args.permission)
        .map(|p| format!("{} ({})", args.permission, p.name))
        .unwrap_or_else(|| format!("{} (not in catalog)", args.permission));
    println!("{} for {}:", label, profile.subject_id());
    println!("  profile:  {}", if granted { "granted" } else { "denied" });
    println!("  offline:  {}", if offline { "granted" } else { "denied" });

    app.touch().await;
    Ok(())
}

pub async fn role(args: RoleArgs, config: Config) -> Result<()> {
    let Some(role) = Role::parse(&args.role) else {
        anyhow::bail!(
            "Unknown role '{}'. Expected one of: {}",
            args.role,
            Role::ALL.map(|r| r.as_str()).join(", ")
        );
    };

    let app = open_app(config).await?;
    require_session(&app).await?;

    app.change_role(role).await?;
    app.touch().await;
    println!("Role changed to {}.", role.display_name());
    Ok(())
}

fn format_age(age: chrono::TimeDelta) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}
