//! CLI subcommand: `localguard monitor`
//!
//! Runs the session-timeout and lockout tickers in the foreground and
//! reports identity changes until interrupted. The instance lock is held
//! for the whole run.

use anyhow::Result;
use tracing::info;

use super::open_app;
use crate::config::Config;

pub async fn run(config: Config) -> Result<()> {
    let app = open_app(config).await?;
    let mut identity = app.identity.subscribe();

    app.start_monitors();
    println!(
        "Monitoring {} (Ctrl-C to stop)",
        app.identity.current().subject_id()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = identity.changed() => {
                if changed.is_err() {
                    break;
                }
                let profile = identity.borrow_and_update().clone();
                if profile.is_authenticated() {
                    println!("Identity is now {}", profile.subject_id());
                } else {
                    println!("Signed out by monitor");
                }
            }
        }
    }

    app.shutdown();
    info!("Monitor stopped");
    Ok(())
}
