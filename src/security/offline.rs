//! Offline login lockout and offline-session liveness.
//!
//! ```text
//!   Unlocked ──(max_attempts unknown subjects)──▶ Locked(until)
//!      ▲                                              │
//!      └───────────── until elapses, valid subject ───┘
//! ```
//!
//! The offline record is liveness metadata only and is kept in plaintext
//! directly on the key→string backend. A background tick re-validates it
//! for the signed-in identity and forces a logout on a missing record,
//! a record for a different subject, an active lockout, or an idle record.
//!
//! Every read-modify-write of the record happens under `record_lock`, so
//! concurrent attempts within one process each consume an attempt.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::backend::KvBackend;
use super::error::{Result, SecurityError, minutes_ceil};
use super::identity::IdentityHolder;
use super::notify::{AUTH_ROUTE, KnownSubject, Notice, Notifier, SubjectDirectory};
use super::permissions::{Role, role_permissions};
use super::ticker::Ticker;

pub const OFFLINE_SESSION_KEY: &str = "offline_session";
pub const DEVICE_ID_KEY: &str = "device_id";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_LOCKOUT_CHECK_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Subject recorded for failed attempts made before any session existed.
const UNKNOWN_SUBJECT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSession {
    pub user_id: String,
    pub role: Role,
    /// Milliseconds since the Unix epoch.
    pub last_activity: i64,
    #[serde(rename = "loginAttempts", alias = "failedAttempts", default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<i64>,
    pub device_id: String,
}

impl OfflineSession {
    /// Remaining lockout at `now`, if locked.
    pub fn lockout_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.lockout_until?;
        let remaining = until - now.timestamp_millis();
        if remaining > 0 {
            Some(Duration::from_millis(remaining as u64))
        } else {
            None
        }
    }

    pub fn lockout_until_time(&self) -> Option<DateTime<Utc>> {
        self.lockout_until.and_then(DateTime::from_timestamp_millis)
    }

    pub fn last_activity_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_activity)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutSettings {
    pub max_attempts: u32,
    pub duration: Duration,
    pub check_interval: Duration,
    /// Idle ceiling applied to the offline record's last activity.
    pub idle_timeout: Duration,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            duration: DEFAULT_LOCKOUT_DURATION,
            check_interval: DEFAULT_LOCKOUT_CHECK_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted(KnownSubject),
    /// Unknown subject. `locked_until` is set when this attempt tripped the lockout.
    Rejected {
        failed_attempts: u32,
        locked_until: Option<DateTime<Utc>>,
    },
    /// Rejected without consuming an attempt.
    Locked {
        until: DateTime<Utc>,
        remaining: Duration,
    },
}

impl LoginOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, LoginOutcome::Accepted(_))
    }

    /// `Locked` becomes [`SecurityError::LockoutViolation`]; a plain
    /// rejection is `Ok(None)`.
    pub fn into_result(self) -> Result<Option<KnownSubject>> {
        match self {
            LoginOutcome::Accepted(subject) => Ok(Some(subject)),
            LoginOutcome::Rejected { .. } => Ok(None),
            LoginOutcome::Locked { remaining, .. } => {
                Err(SecurityError::LockoutViolation { remaining })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineCheck {
    NoIdentity,
    Active,
    /// Signed in without an offline record.
    Missing,
    /// Offline record belongs to another subject.
    Drift,
    Locked,
    Expired,
}

pub struct OfflineSecurity {
    backend: Arc<dyn KvBackend>,
    identity: Arc<IdentityHolder>,
    notifier: Arc<dyn Notifier>,
    subjects: Arc<dyn SubjectDirectory>,
    settings: LockoutSettings,
    record_lock: tokio::sync::Mutex<()>,
    device_id: OnceCell<String>,
    ticker: Mutex<Option<Ticker>>,
}

impl OfflineSecurity {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        identity: Arc<IdentityHolder>,
        notifier: Arc<dyn Notifier>,
        subjects: Arc<dyn SubjectDirectory>,
        settings: LockoutSettings,
    ) -> Self {
        Self {
            backend,
            identity,
            notifier,
            subjects,
            settings,
            record_lock: tokio::sync::Mutex::new(()),
            device_id: OnceCell::new(),
            ticker: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &LockoutSettings {
        &self.settings
    }

    pub async fn validate_login(&self, subject_id: &str) -> LoginOutcome {
        self.validate_login_at(subject_id, Utc::now()).await
    }

    pub async fn validate_login_at(&self, subject_id: &str, now: DateTime<Utc>) -> LoginOutcome {
        let _guard = self.record_lock.lock().await;
        let record = self.record().await;

        if let Some(rec) = &record
            && let Some(remaining) = rec.lockout_remaining(now)
        {
            debug!("Login for {} rejected: locked out", subject_id);
            return LoginOutcome::Locked {
                until: rec.lockout_until_time().unwrap_or(now),
                remaining,
            };
        }

        match self.subjects.find(subject_id) {
            Some(subject) => {
                if let Some(mut rec) = record {
                    rec.failed_attempts = 0;
                    rec.lockout_until = None;
                    self.write_record(&rec).await;
                }
                LoginOutcome::Accepted(subject)
            }
            None => self.record_failed_attempt(record, now).await,
        }
    }

    async fn record_failed_attempt(
        &self,
        existing: Option<OfflineSession>,
        now: DateTime<Utc>,
    ) -> LoginOutcome {
        let mut rec = match existing {
            Some(rec) => rec,
            None => OfflineSession {
                user_id: UNKNOWN_SUBJECT.to_string(),
                role: Role::User,
                last_activity: now.timestamp_millis(),
                failed_attempts: 0,
                lockout_until: None,
                device_id: self.device_id().await,
            },
        };
        rec.failed_attempts = rec.failed_attempts.saturating_add(1);

        let mut locked_until = None;
        if rec.failed_attempts >= self.settings.max_attempts {
            let until = TimeDelta::from_std(self.settings.duration)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            rec.lockout_until = Some(until.timestamp_millis());
            locked_until = Some(until);
            warn!(
                "{} failed login attempts, locking out until {}",
                rec.failed_attempts, until
            );
            self.notifier.notify(Notice::error(
                "Account Locked",
                format!(
                    "Too many failed attempts. Account locked for {} minutes.",
                    minutes_ceil(&self.settings.duration)
                ),
            ));
        } else {
            debug!("Failed login attempt {}", rec.failed_attempts);
        }

        self.write_record(&rec).await;
        LoginOutcome::Rejected {
            failed_attempts: rec.failed_attempts,
            locked_until,
        }
    }

    /// Write a fresh record for a newly signed-in subject.
    pub async fn begin_session(&self, subject: &KnownSubject) {
        self.begin_session_at(subject, Utc::now()).await
    }

    pub async fn begin_session_at(&self, subject: &KnownSubject, now: DateTime<Utc>) {
        let _guard = self.record_lock.lock().await;
        let rec = OfflineSession {
            user_id: subject.subject_id.clone(),
            role: subject.role,
            last_activity: now.timestamp_millis(),
            failed_attempts: 0,
            lockout_until: None,
            device_id: self.device_id().await,
        };
        self.write_record(&rec).await;
    }

    pub async fn validate_offline_session(&self) -> OfflineCheck {
        self.validate_offline_session_at(Utc::now()).await
    }

    pub async fn validate_offline_session_at(&self, now: DateTime<Utc>) -> OfflineCheck {
        let profile = self.identity.current();
        if !profile.is_authenticated() {
            return OfflineCheck::NoIdentity;
        }
        let subject_id = profile.subject_id().to_string();

        let _guard = self.record_lock.lock().await;
        let Some(rec) = self.record().await else {
            warn!("No offline session for {}, logging out", subject_id);
            self.force_logout().await;
            return OfflineCheck::Missing;
        };

        if rec.user_id != subject_id {
            warn!(
                "Offline session belongs to {} but identity is {}, logging out",
                rec.user_id, subject_id
            );
            self.force_logout().await;
            return OfflineCheck::Drift;
        }

        if let Some(remaining) = rec.lockout_remaining(now) {
            self.notifier.notify(Notice::error(
                "Account Locked",
                format!(
                    "Too many failed attempts. Try again in {} minutes.",
                    minutes_ceil(&remaining)
                ),
            ));
            self.force_logout().await;
            // Logout clears the record; the lockout itself must survive it
            self.write_record(&rec).await;
            return OfflineCheck::Locked;
        }

        let last = rec.last_activity_time().unwrap_or(DateTime::<Utc>::MIN_UTC);
        let ceiling = TimeDelta::from_std(self.settings.idle_timeout).unwrap_or(TimeDelta::MAX);
        if now.signed_duration_since(last) > ceiling {
            info!("Offline session for {} went idle", subject_id);
            self.notifier.notify(Notice::error(
                "Session Expired",
                "Your session has expired. Please sign in again.",
            ));
            self.force_logout().await;
            return OfflineCheck::Expired;
        }

        let refreshed = OfflineSession {
            user_id: subject_id,
            role: profile.permissions.role,
            last_activity: now.timestamp_millis(),
            failed_attempts: 0,
            lockout_until: None,
            device_id: rec.device_id,
        };
        self.write_record(&refreshed).await;
        OfflineCheck::Active
    }

    /// Permission check against the identity's live role, ignoring lockout.
    pub fn validate_offline_permission(&self, permission_id: &str) -> bool {
        let profile = self.identity.current();
        if !profile.permissions.is_active {
            return false;
        }
        role_permissions(profile.permissions.role).contains(permission_id)
    }

    /// Stable per-device identifier, generated on first use.
    ///
    /// Concurrent first callers share one initialization.
    pub async fn device_id(&self) -> String {
        self.device_id
            .get_or_init(|| self.load_or_create_device_id())
            .await
            .clone()
    }

    async fn load_or_create_device_id(&self) -> String {
        match self.backend.get(DEVICE_ID_KEY).await {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => warn!("Failed to read device id: {}", e),
        }
        let id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.backend.set(DEVICE_ID_KEY, &id).await {
            warn!("Failed to persist device id: {}", e);
        }
        id
    }

    pub async fn record(&self) -> Option<OfflineSession> {
        let raw = match self.backend.get(OFFLINE_SESSION_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read offline session: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(rec) => Some(rec),
            Err(e) => {
                warn!("Ignoring unreadable offline session: {}", e);
                None
            }
        }
    }

    async fn write_record(&self, rec: &OfflineSession) {
        let json = match serde_json::to_string(rec) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize offline session: {}", e);
                return;
            }
        };
        if let Err(e) = self.backend.set(OFFLINE_SESSION_KEY, &json).await {
            warn!("Failed to persist offline session: {}", e);
        }
    }

    pub async fn force_logout(&self) {
        self.identity.logout().await;
        if let Err(e) = self.backend.remove(OFFLINE_SESSION_KEY).await {
            warn!("Failed to clear offline session: {}", e);
        }
        self.notifier.navigate(AUTH_ROUTE);
    }

    /// Start the periodic re-validation. Replaces a running ticker.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let ticker = Ticker::spawn("offline-lockout", self.settings.check_interval, move || {
            let this = Arc::clone(&this);
            async move {
                let outcome = this.validate_offline_session().await;
                debug!("Offline session check: {:?}", outcome);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::backend::{FileKvBackend, MemoryKvBackend};
    use crate::security::keys::KeyManager;
    use crate::security::notify::{MockNotifier, StaticSubjects};
    use crate::security::store::{EncryptionToggle, SecureStore};
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        offline: Arc<OfflineSecurity>,
        identity: Arc<IdentityHolder>,
        backend: Arc<MemoryKvBackend>,
    }

    fn fixture(notifier: MockNotifier) -> Fixture {
        let backend = Arc::new(MemoryKvBackend::new());
        let keys = Arc::new(KeyManager::new(None, backend.clone()));
        let store = Arc::new(SecureStore::new(
            backend.clone(),
            keys,
            EncryptionToggle::new(true),
        ));
        let identity = Arc::new(IdentityHolder::new(store));
        let offline = Arc::new(OfflineSecurity::new(
            backend.clone(),
            identity.clone(),
            Arc::new(notifier),
            Arc::new(StaticSubjects::default()),
            LockoutSettings::default(),
        ));
        Fixture {
            offline,
            identity,
            backend,
        }
    }

    fn lenient() -> MockNotifier {
        let mut n = MockNotifier::new();
        n.expect_navigate().return_const(());
        n.expect_notify().return_const(());
        n
    }

    async fn sign_in(f: &Fixture, subject_id: &str, now: DateTime<Utc>) {
        let subject = f
            .offline
            .validate_login_at(subject_id, now)
            .await
            .into_result()
            .unwrap()
            .unwrap();
        f.identity
            .login(&subject.subject_id, subject.role)
            .await
            .unwrap();
        f.offline.begin_session_at(&subject, now).await;
    }

    #[tokio::test]
    async fn known_subject_is_accepted() {
        let f = fixture(lenient());
        let outcome = f.offline.validate_login("developer").await;
        assert_eq!(
            outcome,
            LoginOutcome::Accepted(KnownSubject {
                subject_id: "developer".into(),
                role: Role::Developer,
            })
        );
    }

    #[tokio::test]
    async fn fifth_failure_locks_and_notifies_once() {
        let mut n = MockNotifier::new();
        n.expect_notify()
            .withf(|notice| {
                notice.title == "Account Locked"
                    && notice.message == "Too many failed attempts. Account locked for 30 minutes."
            })
            .times(1)
            .return_const(());
        let f = fixture(n);
        let now = Utc::now();

        for attempt in 1..=4 {
            let outcome = f.offline.validate_login_at("mallory", now).await;
            assert_eq!(
                outcome,
                LoginOutcome::Rejected {
                    failed_attempts: attempt,
                    locked_until: None
                }
            );
        }
        let fifth = f.offline.validate_login_at("mallory", now).await;
        let LoginOutcome::Rejected {
            failed_attempts: 5,
            locked_until: Some(until),
        } = fifth
        else {
            panic!("expected lockout, got {:?}", fifth);
        };
        assert_eq!(until, now + ChronoDuration::minutes(30));

        let rec = f.offline.record().await.unwrap();
        assert_eq!(rec.user_id, UNKNOWN_SUBJECT);
        assert_eq!(rec.failed_attempts, 5);
    }

    #[tokio::test]
    async fn valid_subject_is_rejected_while_locked_then_accepted_after() {
        let f = fixture(lenient());
        let now = Utc::now();
        for _ in 0..5 {
            f.offline.validate_login_at("mallory", now).await;
        }

        let sixth = f.offline.validate_login_at("admin", now).await;
        assert!(matches!(sixth, LoginOutcome::Locked { .. }));
        // Locked rejections do not consume attempts
        assert_eq!(f.offline.record().await.unwrap().failed_attempts, 5);

        let later = now + ChronoDuration::minutes(29);
        let LoginOutcome::Locked { remaining, .. } = f.offline.validate_login_at("admin", later).await
        else {
            panic!("still locked");
        };
        assert_eq!(minutes_ceil(&remaining), 1);

        let after = now + ChronoDuration::minutes(31);
        assert!(f.offline.validate_login_at("admin", after).await.is_accepted());
        let rec = f.offline.record().await.unwrap();
        assert_eq!(rec.failed_attempts, 0);
        assert_eq!(rec.lockout_until, None);
    }

    #[tokio::test]
    async fn failure_after_expired_lockout_relocks() {
        let f = fixture(lenient());
        let now = Utc::now();
        for _ in 0..5 {
            f.offline.validate_login_at("mallory", now).await;
        }
        let after = now + ChronoDuration::minutes(31);
        let outcome = f.offline.validate_login_at("mallory", after).await;
        assert!(matches!(
            outcome,
            LoginOutcome::Rejected {
                failed_attempts: 6,
                locked_until: Some(_)
            }
        ));
    }

    #[tokio::test]
    async fn locked_outcome_maps_to_lockout_violation() {
        let f = fixture(lenient());
        let now = Utc::now();
        for _ in 0..5 {
            f.offline.validate_login_at("mallory", now).await;
        }
        let err = f
            .offline
            .validate_login_at("admin", now)
            .await
            .into_result()
            .unwrap_err();
        assert!(matches!(err, SecurityError::LockoutViolation { .. }));
    }

    #[tokio::test]
    async fn active_session_is_refreshed() {
        let f = fixture(lenient());
        let start = Utc::now();
        sign_in(&f, "reseller", start).await;

        let now = start + ChronoDuration::minutes(10);
        assert_eq!(
            f.offline.validate_offline_session_at(now).await,
            OfflineCheck::Active
        );
        let rec = f.offline.record().await.unwrap();
        assert_eq!(rec.last_activity, now.timestamp_millis());
        assert_eq!(rec.role, Role::Reseller);
    }

    #[tokio::test]
    async fn missing_record_is_state_drift() {
        let mut n = MockNotifier::new();
        n.expect_navigate()
            .withf(|route| route == AUTH_ROUTE)
            .times(1)
            .return_const(());
        let f = fixture(n);
        f.identity.login("admin", Role::Admin).await.unwrap();

        assert_eq!(
            f.offline.validate_offline_session().await,
            OfflineCheck::Missing
        );
        assert!(!f.identity.current().is_authenticated());
    }

    #[tokio::test]
    async fn record_for_other_subject_forces_logout() {
        let f = fixture(lenient());
        let now = Utc::now();
        sign_in(&f, "user", now).await;
        f.identity.login("admin", Role::Admin).await.unwrap();

        assert_eq!(
            f.offline.validate_offline_session_at(now).await,
            OfflineCheck::Drift
        );
        assert!(!f.identity.current().is_authenticated());
        assert!(f.offline.record().await.is_none());
    }

    #[tokio::test]
    async fn lockout_evicts_signed_in_identity_but_survives_logout() {
        let f = fixture(lenient());
        let now = Utc::now();
        sign_in(&f, "user", now).await;
        for _ in 0..5 {
            f.offline.validate_login_at("mallory", now).await;
        }

        assert_eq!(
            f.offline.validate_offline_session_at(now).await,
            OfflineCheck::Locked
        );
        assert!(!f.identity.current().is_authenticated());
        let rec = f.offline.record().await.unwrap();
        assert!(rec.lockout_remaining(now).is_some());

        // Re-validating after the eviction is a no-op
        assert_eq!(
            f.offline.validate_offline_session_at(now).await,
            OfflineCheck::NoIdentity
        );
    }

    #[tokio::test]
    async fn idle_record_expires() {
        let f = fixture(lenient());
        let start = Utc::now();
        sign_in(&f, "user", start).await;

        let now = start + ChronoDuration::hours(25);
        assert_eq!(
            f.offline.validate_offline_session_at(now).await,
            OfflineCheck::Expired
        );
    }

    #[tokio::test]
    async fn permission_check_uses_live_role_regardless_of_lockout() {
        let f = fixture(lenient());
        let now = Utc::now();
        sign_in(&f, "developer", now).await;
        for _ in 0..5 {
            f.offline.validate_login_at("mallory", now).await;
        }

        assert!(f.offline.validate_offline_permission("cheat:create"));
        assert!(!f.offline.validate_offline_permission("system:admin"));
    }

    #[tokio::test]
    async fn inactive_identity_has_no_offline_permissions() {
        let f = fixture(lenient());
        f.identity.login("admin", Role::Admin).await.unwrap();
        f.identity
            .update(|p| p.permissions.is_active = false)
            .await
            .unwrap();
        assert!(!f.offline.validate_offline_permission("cheat:view"));
    }

    #[tokio::test]
    async fn device_id_is_stable() {
        let f = fixture(lenient());
        let first = f.offline.device_id().await;
        assert_eq!(f.offline.device_id().await, first);
        assert_eq!(
            f.backend.get(DEVICE_ID_KEY).await.unwrap().as_deref(),
            Some(first.as_str())
        );
    }

    fn file_backed(dir: &std::path::Path) -> Arc<OfflineSecurity> {
        let backend: Arc<dyn KvBackend> = Arc::new(FileKvBackend::new(dir));
        let keys = Arc::new(KeyManager::new(None, backend.clone()));
        let store = Arc::new(SecureStore::new(
            backend.clone(),
            keys,
            EncryptionToggle::new(true),
        ));
        Arc::new(OfflineSecurity::new(
            backend,
            Arc::new(IdentityHolder::new(store)),
            Arc::new(lenient()),
            Arc::new(StaticSubjects::default()),
            LockoutSettings::default(),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_each_consume_an_attempt() {
        let tmp = tempfile::tempdir().unwrap();
        let offline = file_backed(tmp.path());

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let offline = offline.clone();
                tokio::spawn(async move { offline.validate_login("mallory").await })
            })
            .collect();
        let outcomes: Vec<LoginOutcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, LoginOutcome::Rejected { .. }))
            .count();
        let locked = outcomes
            .iter()
            .filter(|o| matches!(o, LoginOutcome::Locked { .. }))
            .count();
        assert_eq!(rejected, 5);
        assert_eq!(locked, 15);

        let rec = offline.record().await.unwrap();
        assert_eq!(rec.failed_attempts, 5);
        assert!(rec.lockout_remaining(Utc::now()).is_some());
        assert!(matches!(
            offline.validate_login("admin").await,
            LoginOutcome::Locked { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_device_id_calls_agree() {
        let tmp = tempfile::tempdir().unwrap();
        let offline = file_backed(tmp.path());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let offline = offline.clone();
                tokio::spawn(async move { offline.device_id().await })
            })
            .collect();
        let ids: Vec<String> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        let stored = std::fs::read_to_string(tmp.path().join(DEVICE_ID_KEY)).unwrap();
        assert_eq!(stored, ids[0]);
    }

    #[tokio::test]
    async fn legacy_record_shape_is_readable() {
        let f = fixture(lenient());
        let raw = r#"{"userId":"user","role":"user","lastActivity":0,"loginAttempts":3,"deviceId":"d"}"#;
        f.backend.set(OFFLINE_SESSION_KEY, raw).await.unwrap();
        let rec = f.offline.record().await.unwrap();
        assert_eq!(rec.failed_attempts, 3);
        assert_eq!(rec.lockout_until, None);
    }
}
