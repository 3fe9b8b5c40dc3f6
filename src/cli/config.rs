use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{Config, DEFAULT_CONFIG_TEMPLATE};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., session.timeout)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Config key (e.g., lockout.max_attempts)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,

    /// Initialize default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(args: ConfigArgs, config_override: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(config_override, &format),
        ConfigCommands::Get { key } => get_config(config_override, &key),
        ConfigCommands::Set { key, value } => set_config(config_override, &key, &value),
        ConfigCommands::Path => show_path(config_override),
        ConfigCommands::Init { force } => init_config(config_override, force),
    }
}

fn show_config(config_override: Option<&Path>, format: &str) -> Result<()> {
    let config = Config::load_with(config_override)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        _ => {
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
    }

    Ok(())
}

fn get_config(config_override: Option<&Path>, key: &str) -> Result<()> {
    let config = Config::load_with(config_override)?;
    let value = config.get_value(key)?;
    println!("{}", value);
    Ok(())
}

fn set_config(config_override: Option<&Path>, key: &str, value: &str) -> Result<()> {
    let mut config = Config::load_with(config_override)?;
    config.set_value(key, value)?;
    config.save()?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn config_path(config_override: Option<&Path>) -> Result<PathBuf> {
    match config_override {
        Some(p) => Ok(p.to_path_buf()),
        None => Config::config_path(),
    }
}

fn show_path(config_override: Option<&Path>) -> Result<()> {
    let path = config_path(config_override)?;
    println!("{}", path.display());
    Ok(())
}

fn init_config(config_override: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path(config_override)?;

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    // Create parent directories
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write template config with comments
    std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;

    println!("Created config file at {}", path.display());
    Ok(())
}
