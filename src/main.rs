use anyhow::Result;
use clap::Parser;

use localguard::cli::{self, Cli, Commands};
use localguard::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config_override = cli.config.as_deref();

    // Errors surface only for commands that need the config
    let config = Config::load_with(config_override);

    // Initialize logging: RUST_LOG, then --verbose, then logging.level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config
            .as_ref()
            .map(|c| c.logging.level.clone())
            .unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Login(args) => cli::session::login(args, config?).await,
        Commands::Logout => cli::session::logout(config?).await,
        Commands::Status => cli::session::status(config?).await,
        Commands::Check(args) => cli::session::check(args, config?).await,
        Commands::Role(args) => cli::session::role(args, config?).await,
        Commands::Audit(args) => cli::audit::run(args, config?).await,
        Commands::Monitor => cli::monitor::run(config?).await,
        Commands::Config(args) => cli::config::run(args, config_override).await,
        Commands::Paths => cli::paths::run(),
    }
}
