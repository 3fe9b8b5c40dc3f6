use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::Paths;
use crate::security::{
    AuditSettings, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_EVENTS, KnownSubject, LockoutSettings, Role,
    SessionSettings, StaticSubjects,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    /// Config file this was loaded from (not serialized)
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub lockout: LockoutConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Known subjects for offline login. Empty means the built-in set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<SubjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Seal persisted state under the device key (default: true)
    ///
    /// Reads follow the current value, not the mode a value was written
    /// in. Values written in plaintext stay readable after enabling it.
    #[serde(default = "default_true")]
    pub encrypt_local_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Absolute session ceiling, e.g. "24h"
    #[serde(default = "default_session_timeout")]
    pub timeout: String,

    #[serde(default = "default_session_check_interval")]
    pub check_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_lockout_duration")]
    pub duration: String,

    #[serde(default = "default_lockout_check_interval")]
    pub check_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Keep the hash of the last evicted event so a truncated ledger
    /// still verifies from its first retained entry (default: false)
    #[serde(default)]
    pub checkpoint_truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfig {
    pub subject_id: String,
    pub role: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_session_timeout() -> String {
    "24h".to_string()
}
fn default_session_check_interval() -> String {
    "5m".to_string()
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_lockout_duration() -> String {
    "30m".to_string()
}
fn default_lockout_check_interval() -> String {
    "10m".to_string()
}
fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encrypt_local_data: default_true(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: default_session_timeout(),
            check_interval: default_session_check_interval(),
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            duration: default_lockout_duration(),
            check_interval: default_lockout_check_interval(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            checkpoint_truncated: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parse a duration like `"30s"`, `"5m"`, `"24h"` or `"7d"`.
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid number in duration `{}`", s))?;

    let secs = match unit.trim() {
        "s" => Some(n),
        "m" => n.checked_mul(60),
        "h" => n.checked_mul(60 * 60),
        "d" => n.checked_mul(24 * 60 * 60),
        other => return Err(format!("unknown duration unit `{}` in `{}`", other, s)),
    };

    secs.map(Duration::from_secs)
        .ok_or_else(|| format!("duration `{}` is too large", s))
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Load from `config_override`, or from the default location. The
    /// default location gets a commented template on first run.
    pub fn load_with(config_override: Option<&Path>) -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        Self::load_from(paths, config_override)
    }

    pub fn load_from(paths: Paths, config_override: Option<&Path>) -> Result<Self> {
        let path = match config_override {
            Some(p) => p.to_path_buf(),
            None => paths.config_file(),
        };

        if !path.exists() {
            if config_override.is_some() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            // Create default config file on first run
            let config = Config {
                paths,
                source: Some(path),
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.paths = paths;
        config.source = Some(path);
        config.validate()?;

        Ok(config)
    }

    /// Reject values that would make the security settings meaningless.
    pub fn validate(&self) -> Result<()> {
        self.session_settings()?;
        self.lockout_settings()?;
        if self.audit.max_events == 0 {
            anyhow::bail!("audit.max_events must be at least 1");
        }
        for subject in &self.subjects {
            if Role::parse(&subject.role).is_none() {
                anyhow::bail!(
                    "Unknown role `{}` for subject `{}`",
                    subject.role,
                    subject.subject_id
                );
            }
        }
        Ok(())
    }

    fn target_path(&self) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| self.paths.config_file())
    }

    pub fn save(&self) -> Result<()> {
        let path = self.target_path();

        // Create parent directories
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.target_path();

        // Create parent directories
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    pub fn session_settings(&self) -> Result<SessionSettings> {
        Ok(SessionSettings {
            timeout: duration_setting("session.timeout", &self.session.timeout)?,
            check_interval: duration_setting(
                "session.check_interval",
                &self.session.check_interval,
            )?,
        })
    }

    /// The offline idle ceiling follows the absolute session timeout.
    pub fn lockout_settings(&self) -> Result<LockoutSettings> {
        if self.lockout.max_attempts == 0 {
            anyhow::bail!("lockout.max_attempts must be at least 1");
        }
        Ok(LockoutSettings {
            max_attempts: self.lockout.max_attempts,
            duration: duration_setting("lockout.duration", &self.lockout.duration)?,
            check_interval: duration_setting(
                "lockout.check_interval",
                &self.lockout.check_interval,
            )?,
            idle_timeout: duration_setting("session.timeout", &self.session.timeout)?,
        })
    }

    pub fn audit_settings(&self) -> AuditSettings {
        AuditSettings {
            max_events: self.audit.max_events,
            checkpoint_truncated: self.audit.checkpoint_truncated,
        }
    }

    /// Known subjects. Entries with an unknown role are skipped.
    pub fn subject_directory(&self) -> StaticSubjects {
        if self.subjects.is_empty() {
            return StaticSubjects::default();
        }
        StaticSubjects::new(
            self.subjects
                .iter()
                .filter_map(|s| {
                    Role::parse(&s.role).map(|role| KnownSubject {
                        subject_id: s.subject_id.clone(),
                        role,
                    })
                })
                .collect(),
        )
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["security", "encrypt_local_data"] => Ok(self.security.encrypt_local_data.to_string()),
            ["session", "timeout"] => Ok(self.session.timeout.clone()),
            ["session", "check_interval"] => Ok(self.session.check_interval.clone()),
            ["lockout", "max_attempts"] => Ok(self.lockout.max_attempts.to_string()),
            ["lockout", "duration"] => Ok(self.lockout.duration.clone()),
            ["lockout", "check_interval"] => Ok(self.lockout.check_interval.clone()),
            ["audit", "max_events"] => Ok(self.audit.max_events.to_string()),
            ["audit", "checkpoint_truncated"] => Ok(self.audit.checkpoint_truncated.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["security", "encrypt_local_data"] => self.security.encrypt_local_data = value.parse()?,
            ["session", "timeout"] => self.session.timeout = checked_duration(key, value)?,
            ["session", "check_interval"] => {
                self.session.check_interval = checked_duration(key, value)?
            }
            ["lockout", "max_attempts"] => self.lockout.max_attempts = value.parse()?,
            ["lockout", "duration"] => self.lockout.duration = checked_duration(key, value)?,
            ["lockout", "check_interval"] => {
                self.lockout.check_interval = checked_duration(key, value)?
            }
            ["audit", "max_events"] => self.audit.max_events = value.parse()?,
            ["audit", "checkpoint_truncated"] => self.audit.checkpoint_truncated = value.parse()?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        self.validate()
    }
}

fn duration_setting(key: &str, value: &str) -> Result<Duration> {
    let d = parse_duration(value).map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e))?;
    if d.is_zero() {
        anyhow::bail!("Invalid {}: must be greater than zero", key);
    }
    Ok(d)
}

fn checked_duration(key: &str, value: &str) -> Result<String> {
    duration_setting(key, value)?;
    Ok(value.trim().to_string())
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# LocalGuard Configuration
# Auto-created on first run. Edit as needed.

[security]
# Seal persisted state (profile, session, audit ledger) under the device key.
# Data written while this was off stays readable after turning it on.
encrypt_local_data = true

[session]
# Absolute session ceiling and how often it is checked
timeout = "24h"
check_interval = "5m"

[lockout]
# Offline login: lock after this many unknown subjects in a row
max_attempts = 5
duration = "30m"
check_interval = "10m"

[audit]
# Ledger keeps the most recent events only
max_events = 1000
# Keep the hash of the last evicted event so verification still anchors
# checkpoint_truncated = false

[logging]
level = "info"

# Known subjects for offline login (default: admin, developer, reseller, user)
# [[subjects]]
# subject_id = "alice"
# role = "admin"
"#;
