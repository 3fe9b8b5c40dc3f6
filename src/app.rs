//! Process-wide application state.
//!
//! `App` owns exactly one of each manager. Construction order:
//!
//! 1. instance lock
//! 2. backends (key→string store, key file store)
//! 3. Key Manager
//! 4. Secure Store, encryption toggle seeded from config
//! 5. Identity Holder, hydrated from the store
//! 6. Audit Log
//! 7. Session Manager
//! 8. Offline Security
//!
//! Background monitors are started separately with [`App::start_monitors`]
//! and stopped by [`App::shutdown`] (or by dropping the `App`).

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::concurrency::{InstanceLock, InstanceLockGuard};
use crate::config::Config;
use crate::paths::Paths;
use crate::security::{
    AuditLog, EncryptionToggle, FileKvBackend, FsKeyFileStore, IdentityHolder, KeyManager,
    KvBackend, LoginOutcome, Notifier, OfflineSecurity, Role, SESSION_KEY, SecureStore,
    SecurityError, SessionManager, actions,
};

pub struct App {
    pub config: Config,
    pub backend: Arc<dyn KvBackend>,
    pub keys: Arc<KeyManager>,
    pub store: Arc<SecureStore>,
    pub identity: Arc<IdentityHolder>,
    pub audit: Arc<AuditLog>,
    pub session: Arc<SessionManager>,
    pub offline: Arc<OfflineSecurity>,
    _lock: InstanceLockGuard,
}

impl App {
    pub async fn init(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let paths: &Paths = &config.paths;
        paths.ensure_dirs()?;

        let lock = InstanceLock::new(paths.instance_lock())?.acquire_exclusive()?;

        let backend: Arc<dyn KvBackend> = Arc::new(FileKvBackend::new(&paths.store_dir));
        let key_files = Arc::new(FsKeyFileStore::new(&paths.data_dir));

        let keys = Arc::new(KeyManager::new(Some(key_files), backend.clone()));
        keys.get_or_create_key()
            .await
            .context("Failed to load or create the device key")?;

        let store = Arc::new(SecureStore::new(
            backend.clone(),
            keys.clone(),
            EncryptionToggle::new(config.security.encrypt_local_data),
        ));

        let identity = Arc::new(IdentityHolder::new(store.clone()));
        if let Some(loaded) = identity.hydrate().await {
            info!(
                "Restored identity {} ({})",
                loaded.value.subject_id(),
                loaded.value.permissions.role
            );
        }

        let audit = Arc::new(AuditLog::new(
            store.clone(),
            identity.clone(),
            config.audit_settings(),
        ));

        let session = Arc::new(SessionManager::new(
            store.clone(),
            identity.clone(),
            notifier.clone(),
            config.session_settings()?,
        ));

        let offline = Arc::new(OfflineSecurity::new(
            backend.clone(),
            identity.clone(),
            notifier,
            Arc::new(config.subject_directory()),
            config.lockout_settings()?,
        ));

        Ok(Self {
            config,
            backend,
            keys,
            store,
            identity,
            audit,
            session,
            offline,
            _lock: lock,
        })
    }

    /// Start both tickers. Calling again replaces them.
    pub fn start_monitors(&self) {
        self.session.start();
        self.offline.start();
        info!("Session and lockout monitors started");
    }

    pub fn monitors_running(&self) -> bool {
        self.session.is_running() && self.offline.is_running()
    }

    /// Stop both tickers.
    pub fn shutdown(&self) {
        self.session.stop();
        self.offline.stop();
        info!("Session and lockout monitors stopped");
    }

    /// Offline login: validate, sign in, seed both session records, audit.
    pub async fn login(&self, subject_id: &str) -> Result<LoginOutcome> {
        let outcome = self.offline.validate_login(subject_id).await;
        let LoginOutcome::Accepted(subject) = &outcome else {
            return Ok(outcome);
        };

        self.identity
            .login(&subject.subject_id, subject.role)
            .await
            .context("Failed to persist profile")?;
        self.offline.begin_session(subject).await;
        self.session.update_activity().await;

        let mut details = Map::new();
        details.insert("method".to_string(), Value::String("offline".to_string()));
        if let Err(e) = self.audit.record(actions::LOGIN, "session", details).await {
            warn!("Login not recorded in audit log: {}", e);
        }
        info!("{} signed in as {}", subject.subject_id, subject.role);

        Ok(outcome)
    }

    /// Record the logout, then clear identity and both session records.
    pub async fn logout(&self) -> Result<()> {
        if !self.identity.current().is_authenticated() {
            return Ok(());
        }
        if let Err(e) = self.audit.record(actions::LOGOUT, "session", Map::new()).await {
            warn!("Logout not recorded in audit log: {}", e);
        }
        self.identity.logout().await;
        self.store.remove(SESSION_KEY).await?;
        Ok(())
    }

    /// An authenticated interaction: refreshes the absolute session.
    pub async fn touch(&self) {
        self.session.update_activity().await;
    }

    /// Change the current role. Requires `role:manage`.
    pub async fn change_role(&self, role: Role) -> Result<()> {
        let previous = self.identity.current().permissions.role;
        self.identity.update_role(role).await?;

        let mut details = Map::new();
        details.insert("from".to_string(), Value::String(previous.to_string()));
        details.insert("to".to_string(), Value::String(role.to_string()));
        self.audit.record(actions::ROLE_CHANGE, "role", details).await?;
        Ok(())
    }

    /// Empty the audit ledger. Requires `system:admin`.
    pub async fn clear_audit(&self) -> Result<()> {
        if !self.identity.has_permission("system:admin") {
            warn!("Unauthorized audit clear attempt");
            return Err(SecurityError::UnauthorizedMutation {
                permission: "system:admin".to_string(),
            }
            .into());
        }
        self.audit.clear().await?;
        Ok(())
    }

    pub fn set_encryption(&self, enabled: bool) {
        self.store.encryption().set(enabled);
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.session.stop();
        self.offline.stop();
    }
}
