//! Directory layout.
//!
//! Each directory comes from a `LOCALGUARD_*_DIR` override when it is set
//! to an absolute path, else from the platform base directories
//! (`etcetera`, which honors `XDG_*_HOME`).
//!
//! ```text
//! config_dir/config.toml
//! data_dir/keys/device.key
//! state_dir/localguard.lock
//! state_dir/store/<key>        (or LOCALGUARD_STORE_DIR)
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::security::{DEVICE_KEY_DIR, DEVICE_KEY_FILENAME};

const APP_DIR: &str = "localguard";

#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    /// Holds the device key.
    pub data_dir: PathBuf,
    /// Holds the instance lock and, by default, the store.
    pub state_dir: PathBuf,
    /// One file per persisted key.
    pub store_dir: PathBuf,
}

impl Paths {
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve against an arbitrary environment lookup.
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let base = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = override_or(&env_fn, "LOCALGUARD_CONFIG_DIR")
            .unwrap_or_else(|| base.config_dir().join(APP_DIR));
        let data_dir = override_or(&env_fn, "LOCALGUARD_DATA_DIR")
            .unwrap_or_else(|| base.data_dir().join(APP_DIR));
        let state_dir = override_or(&env_fn, "LOCALGUARD_STATE_DIR").unwrap_or_else(|| {
            base.state_dir()
                .unwrap_or_else(|| base.data_dir())
                .join(APP_DIR)
        });
        let store_dir =
            override_or(&env_fn, "LOCALGUARD_STORE_DIR").unwrap_or_else(|| state_dir.join("store"));

        Ok(Self {
            config_dir,
            data_dir,
            state_dir,
            store_dir,
        })
    }

    /// Everything under one root directory.
    pub fn under(root: &Path) -> Self {
        let state_dir = root.join("state");
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
            store_dir: state_dir.join("store"),
            state_dir,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn device_key(&self) -> PathBuf {
        self.data_dir.join(DEVICE_KEY_DIR).join(DEVICE_KEY_FILENAME)
    }

    /// Lock guarding the store; one `App` per state directory.
    pub fn instance_lock(&self) -> PathBuf {
        self.state_dir.join("localguard.lock")
    }

    /// Create every directory, owner-only on Unix.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.state_dir,
            &self.store_dir,
        ] {
            create_private_dir(dir)?;
        }
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            let state_dir = home.join(".local/state").join(APP_DIR);
            Self {
                config_dir: home.join(".config").join(APP_DIR),
                data_dir: home.join(".local/share").join(APP_DIR),
                store_dir: state_dir.join("store"),
                state_dir,
            }
        })
    }
}

/// An absolute, tilde-expanded override. Empty or relative values are ignored.
fn override_or<F>(env_fn: &F, var: &str) -> Option<PathBuf>
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    let raw = env_fn(var).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = PathBuf::from(shellexpand::tilde(trimmed).into_owned());
    path.is_absolute().then_some(path)
}

fn create_private_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_env(
        map: HashMap<&str, &str>,
    ) -> impl Fn(&str) -> std::result::Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn default_paths_are_xdg_compliant() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new())).unwrap();

        assert!(paths.config_dir.ends_with("localguard"));
        assert!(paths.data_dir.ends_with("localguard"));
        assert!(paths.state_dir.ends_with("localguard"));
        assert_eq!(paths.store_dir, paths.state_dir.join("store"));
    }

    #[test]
    fn env_vars_override_xdg() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("LOCALGUARD_CONFIG_DIR", "/custom/config");
        env.insert("LOCALGUARD_DATA_DIR", "/custom/data");
        env.insert("LOCALGUARD_STATE_DIR", "/custom/state");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/custom/config"));
        assert_eq!(paths.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(paths.state_dir, PathBuf::from("/custom/state"));
        assert_eq!(paths.store_dir, PathBuf::from("/custom/state/store"));
    }

    #[test]
    fn relative_paths_are_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("LOCALGUARD_CONFIG_DIR", "relative/path");
        env.insert("LOCALGUARD_STORE_DIR", "also/relative");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert!(paths.config_dir.is_absolute());
        assert_ne!(paths.config_dir, PathBuf::from("relative/path"));
        assert_eq!(paths.store_dir, paths.state_dir.join("store"));
    }

    #[test]
    fn store_override_independent_of_state_dir() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("LOCALGUARD_STORE_DIR", "/srv/guard-store");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.store_dir, PathBuf::from("/srv/guard-store"));
        assert!(paths.state_dir.ends_with("localguard"));
    }

    #[test]
    fn instance_lock_follows_the_state_dir() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("LOCALGUARD_STATE_DIR", "/var/lib/guard");
        env.insert("XDG_RUNTIME_DIR", "/run/user/1000");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(
            paths.instance_lock(),
            PathBuf::from("/var/lib/guard/localguard.lock")
        );
    }

    #[test]
    fn convenience_accessors() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new())).unwrap();

        assert!(paths.config_file().ends_with("config.toml"));
        assert!(paths.device_key().ends_with("keys/device.key"));
        assert!(paths.instance_lock().ends_with("localguard.lock"));
    }

    #[test]
    fn under_root_keeps_everything_inside() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::under(tmp.path());
        paths.ensure_dirs().unwrap();

        assert!(paths.store_dir.starts_with(tmp.path()));
        assert!(paths.instance_lock().starts_with(tmp.path()));
        assert!(paths.store_dir.is_dir());
    }
}
