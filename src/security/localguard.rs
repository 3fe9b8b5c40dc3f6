//! # LocalGuard Security Module
//!
//! Front door for the security core. Every type, constant and function the
//! rest of the crate uses is re-exported here.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 localguard.rs (you are here)                     │
//! │                 Public API facade & documentation                │
//! ├──────────────┬──────────────┬──────────────┬─────────────────────┤
//! │ session.rs   │ offline.rs   │ audit.rs     │ guard.rs            │
//! │ 24h absolute │ lockout +    │ hash-chained │ route / action      │
//! │ timeout      │ liveness     │ ledger       │ checks              │
//! ├──────────────┴──────────────┴──────┬───────┴─────────────────────┤
//! │ identity.rs  current profile,      │ permissions.rs  static      │
//! │              repair on load        │ role → permission table     │
//! ├────────────────────────────────────┴─────────────────────────────┤
//! │ store.rs  AES-256-GCM seal/open, plaintext fallback, migration   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ keys.rs   device key, created once per device                    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ backend.rs  key→string store, key file store                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! 1. **Fail closed**: decryption failures read as absent, a corrupt
//!    ledger resets to empty, unauthorized mutations are refused. Nothing
//!    degrades into granting access.
//!
//! 2. **Device-bound**: persisted state is sealed under a 256-bit key
//!    generated on first use and kept outside the data store when the
//!    platform allows it.
//!
//! 3. **Tamper-evident**: every audit event carries the hash of its
//!    predecessor. Editing, reordering or dropping an event breaks the
//!    chain at that index.
//!
//! 4. **Self-healing identity**: a stored profile whose permission set
//!    does not match its role is rewritten to the role's canonical set.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use localguard::security::{actions, AuditLog, IdentityHolder, OfflineSecurity};
//!
//! let subject = offline.validate_login("admin").await.into_result()?;
//! if let Some(subject) = subject {
//!     identity.login(&subject.subject_id, subject.role).await?;
//!     offline.begin_session(&subject).await;
//!     audit.record(actions::LOGIN, "session", Default::default()).await?;
//! }
//! ```
//!
//! ## Persisted Keys
//!
//! ```text
//! <data_dir>/keys/device.key     # base64 device key (0600)
//! <state_dir>/store/
//! ├── localguard_device_key_b64  # fallback key location
//! ├── user_profile.secure        # sealed profile
//! ├── session.secure             # sealed absolute-session record
//! ├── audit_log.secure           # sealed ledger, most-recent-last
//! ├── audit_checkpoint.secure    # hash of the last evicted event
//! ├── offline_session            # plaintext lockout/liveness record
//! └── device_id                  # plaintext device identifier
//! ```
//!
//! ## Threat Model
//!
//! | Threat | Defense Layer |
//! |--------|--------------|
//! | Reading profile/session files | AEAD under the device key |
//! | Editing permissions in a stored profile | Repair pass on hydrate |
//! | Editing or deleting audit events | Hash chain, `verify_chain` |
//! | Brute-forcing offline subjects | Lockout after repeated failures |
//! | Stale identity after lockout | Periodic offline re-validation |
//! | Concurrent audit writers | Single serialized writer |

// ── Errors ──────────────────────────────────────────────────────────

pub use super::error::{Result, SecurityError, minutes_ceil};

// ── Storage ─────────────────────────────────────────────────────────

pub use super::backend::{FileKvBackend, FsKeyFileStore, KeyFileStore, KvBackend, MemoryKvBackend};

pub use super::keys::{
    DEVICE_KEY_DIR, DEVICE_KEY_FALLBACK, DEVICE_KEY_FILENAME, DEVICE_KEY_LEN, DeviceKey,
    KeyManager,
};

pub use super::store::{EncryptionToggle, Migrated, NONCE_LEN, SecureStore, open, seal};

// ── Permission Model ────────────────────────────────────────────────

pub use super::permissions::{
    PERMISSIONS, Permission, PermissionSnapshot, ROLES, Role, RoleTable, can_access_resource,
    find_permission, has_permission, has_permission_at, has_role, role_permissions,
};

// ── Identity ────────────────────────────────────────────────────────

pub use super::identity::{
    ANONYMOUS, IdentityHolder, LEGACY_PROFILE_KEY, PROFILE_KEY, Repaired, StoredProfile,
    StoredSnapshot, UserProfile, repair_profile,
};

// ── Audit Log ───────────────────────────────────────────────────────

pub use super::audit::{
    AUDIT_CHECKPOINT_KEY, AUDIT_LOG_KEY, AuditEvent, AuditLog, AuditSettings, ChainLink,
    DEFAULT_MAX_EVENTS, LEGACY_AUDIT_LOG_KEY, actions, compute_event_hash, verify_chain,
};

// ── Session / Lockout ───────────────────────────────────────────────

pub use super::session::{
    DEFAULT_SESSION_CHECK_INTERVAL, DEFAULT_SESSION_TIMEOUT, LEGACY_SESSION_KEY, SESSION_KEY,
    SessionCheck, SessionManager, SessionRecord, SessionSettings,
};

pub use super::offline::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_LOCKOUT_CHECK_INTERVAL, DEFAULT_LOCKOUT_DURATION,
    DEFAULT_MAX_ATTEMPTS, DEVICE_ID_KEY, LockoutSettings, LoginOutcome, OFFLINE_SESSION_KEY,
    OfflineCheck, OfflineSecurity, OfflineSession,
};

pub use super::ticker::Ticker;

// ── Guards & Outbound Seams ─────────────────────────────────────────

pub use super::guard::{
    RouteGuard, check_route_access, protect_route, require_auth, require_permission,
    require_role,
};

pub use super::notify::{
    AUTH_ROUTE, HOME_ROUTE, KnownSubject, Notice, NoticeLevel, Notifier, StaticSubjects,
    SubjectDirectory, TracingNotifier,
};
