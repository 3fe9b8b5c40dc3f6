//! CLI subcommand: `localguard paths`
//!
//! Prints the resolved directories.

use anyhow::Result;

use crate::paths::Paths;

pub fn run() -> Result<()> {
    let paths = Paths::resolve()?;

    println!("LocalGuard Paths");
    println!("================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("Data:       {}", paths.data_dir.display());
    println!("  device key:     {}", paths.device_key().display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  instance lock:  {}", paths.instance_lock().display());
    println!("  store:          {}", paths.store_dir.display());

    Ok(())
}
