//! Absolute session timeout.
//!
//! `Active → Expired`. The encrypted [`SessionRecord`] holds the last
//! authenticated interaction. A background tick compares its age against
//! the ceiling (24 hours by default) and forces a logout once exceeded:
//! identity cleared, record removed, navigation to the auth entry point.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::identity::IdentityHolder;
use super::notify::{AUTH_ROUTE, Notice, Notifier};
use super::permissions::Role;
use super::store::SecureStore;
use super::ticker::Ticker;

pub const SESSION_KEY: &str = "session.secure";
pub const LEGACY_SESSION_KEY: &str = "session";

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Milliseconds since the Unix epoch.
    pub last_activity: i64,
    pub user_id: String,
    pub role: Role,
}

impl SessionRecord {
    pub fn last_activity_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_activity)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub check_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SESSION_TIMEOUT,
            check_interval: DEFAULT_SESSION_CHECK_INTERVAL,
        }
    }
}

/// Outcome of one validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    /// Nobody is signed in; nothing to do.
    NoIdentity,
    /// Session is within the ceiling.
    Active,
    /// Signed in but no session record exists. Forced logout.
    Missing,
    /// Ceiling exceeded. Forced logout.
    Expired,
}

pub struct SessionManager {
    store: Arc<SecureStore>,
    identity: Arc<IdentityHolder>,
    notifier: Arc<dyn Notifier>,
    settings: SessionSettings,
    ticker: Mutex<Option<Ticker>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<SecureStore>,
        identity: Arc<IdentityHolder>,
        notifier: Arc<dyn Notifier>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            settings,
            ticker: Mutex::new(None),
        }
    }

    pub async fn validate(&self) -> SessionCheck {
        self.validate_at(Utc::now()).await
    }

    pub async fn validate_at(&self, now: DateTime<Utc>) -> SessionCheck {
        let profile = self.identity.current();
        if !profile.is_authenticated() {
            return SessionCheck::NoIdentity;
        }

        let Some(record) = self.record().await else {
            warn!("No session record for {}, logging out", profile.subject_id());
            self.force_logout().await;
            return SessionCheck::Missing;
        };

        let last = record
            .last_activity_time()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let ceiling = TimeDelta::from_std(self.settings.timeout).unwrap_or(TimeDelta::MAX);
        if now.signed_duration_since(last) > ceiling {
            info!("Session for {} expired", profile.subject_id());
            self.notifier.notify(Notice::error(
                "Session Expired",
                "Your session has expired. Please sign in again.",
            ));
            self.force_logout().await;
            return SessionCheck::Expired;
        }

        SessionCheck::Active
    }

    /// Refresh the last-activity time for the current identity.
    pub async fn update_activity(&self) {
        self.update_activity_at(Utc::now()).await
    }

    pub async fn update_activity_at(&self, now: DateTime<Utc>) {
        let profile = self.identity.current();
        if !profile.is_authenticated() {
            return;
        }
        let record = SessionRecord {
            last_activity: now.timestamp_millis(),
            user_id: profile.subject_id().to_string(),
            role: profile.permissions.role,
        };
        if let Err(e) = self.store.set(SESSION_KEY, &record).await {
            warn!("Failed to persist session activity: {}", e);
        }
    }

    pub async fn record(&self) -> Option<SessionRecord> {
        self.store
            .get_or_migrate::<SessionRecord>(SESSION_KEY, LEGACY_SESSION_KEY)
            .await
            .map(|m| m.value)
    }

    /// Clear identity and session record, then send the user to sign in.
    pub async fn force_logout(&self) {
        self.identity.logout().await;
        if let Err(e) = self.store.remove(SESSION_KEY).await {
            warn!("Failed to clear session record: {}", e);
        }
        self.notifier.navigate(AUTH_ROUTE);
    }

    /// Start the periodic check. Replaces a running ticker.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let ticker = Ticker::spawn("session-timeout", self.settings.check_interval, move || {
            let this = Arc::clone(&this);
            async move {
                let outcome = this.validate().await;
                debug!("Session check: {:?}", outcome);
            }
        });
        if let Ok(mut slot) = self.ticker.lock() {
            *slot = Some(ticker);
        }
    }

    pub fn stop(&self) {
        if let Ok(mut slot) = self.ticker.lock() {
            slot.take();
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|t| t.is_running()))
            .unwrap_or(false)
    }
}
