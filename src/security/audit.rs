//! Hash-chained, bounded security audit ledger.
//!
//! Persisted through the secure store under [`AUDIT_LOG_KEY`] as a JSON
//! array of [`AuditEvent`]s, most recent last, at most `max_events` long.
//! Every flush overwrites the whole array.
//!
//! # Chain
//!
//! Each event carries `chain: { prevHash, hash }`. `hash` is the hex
//! SHA-256 of the event's canonical JSON with `chain.hash` blanked (and
//! `prevHash` filled in). The first event of a fresh ledger has
//! `prevHash = null`; every later event links to its predecessor's hash.
//!
//! # Truncation
//!
//! When the ledger exceeds `max_events` the oldest entries are evicted
//! without rehashing. The first retained entry then carries a non-null
//! `prevHash`. With `checkpoint_truncated` enabled the hash of the last
//! evicted event is kept under [`AUDIT_CHECKPOINT_KEY`] so verification can
//! still anchor the retained prefix.
//!
//! # Ordering
//!
//! `record` holds the ledger lock across hydrate → append → persist, so
//! concurrent calls in one process are serialized and never share a
//! `prevHash`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::{Result, SecurityError};
use super::identity::IdentityHolder;
use super::store::SecureStore;

pub const AUDIT_LOG_KEY: &str = "audit_log.secure";
pub const LEGACY_AUDIT_LOG_KEY: &str = "audit_log";
pub const AUDIT_CHECKPOINT_KEY: &str = "audit_checkpoint.secure";

pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Predefined action names.
pub mod actions {
    pub const LOGIN: &str = "user.login";
    pub const LOGOUT: &str = "user.logout";
    pub const PERMISSION_CHANGE: &str = "permission.change";
    pub const ROLE_CHANGE: &str = "role.change";
    pub const ADMIN_ACCESS: &str = "admin.access";
    pub const LICENSE_ADD: &str = "license.add";
    pub const LICENSE_REMOVE: &str = "license.remove";
    pub const CHEAT_ACCESS: &str = "cheat.access";
    pub const SETTINGS_CHANGE: &str = "settings.change";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLink {
    pub prev_hash: Option<String>,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
    /// Acting subject, or `"anonymous"`.
    pub user_id: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainLink>,
}

/// Hex SHA-256 over the event's canonical form (`chain.hash` blanked).
pub fn compute_event_hash(event: &AuditEvent) -> Result<String> {
    let mut canonical = event.clone();
    canonical.chain = Some(ChainLink {
        prev_hash: event.chain.as_ref().and_then(|c| c.prev_hash.clone()),
        hash: String::new(),
    });
    let json = serde_json::to_string(&canonical)?;
    Ok(sha256_hex(json.as_bytes()))
}

/// Check a ledger's links.
///
/// Returns the indices whose stored hash does not match the recomputed
/// one, or whose `prevHash` does not match the previous entry. Index 0 is
/// checked against `checkpoint` when one is given; otherwise any
/// `prevHash` there is accepted as a truncation point.
pub fn verify_chain(events: &[AuditEvent], checkpoint: Option<&str>) -> Vec<usize> {
    let mut broken = Vec::new();

    for (i, event) in events.iter().enumerate() {
        let Some(chain) = event.chain.as_ref() else {
            broken.push(i);
            continue;
        };

        let hash_ok = compute_event_hash(event)
            .map(|h| h == chain.hash)
            .unwrap_or(false);

        let link_ok = if i == 0 {
            match (checkpoint, chain.prev_hash.as_deref()) {
                (Some(cp), Some(prev)) => cp == prev,
                (Some(_), None) => false,
                (None, _) => true,
            }
        } else {
            let prev_hash = events[i - 1].chain.as_ref().map(|c| c.hash.as_str());
            chain.prev_hash.as_deref() == prev_hash && prev_hash.is_some()
        };

        if !hash_ok || !link_ok {
            broken.push(i);
        }
    }

    broken
}

#[derive(Debug, Clone, Copy)]
pub struct AuditSettings {
    pub max_events: usize,
    pub checkpoint_truncated: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            checkpoint_truncated: false,
        }
    }
}

#[derive(Default)]
struct Ledger {
    loaded: bool,
    events: Vec<AuditEvent>,
    checkpoint: Option<String>,
}

/// Sole owner of chain computation and append order.
pub struct AuditLog {
    store: Arc<SecureStore>,
    identity: Arc<IdentityHolder>,
    settings: AuditSettings,
    ledger: Mutex<Ledger>,
}

impl AuditLog {
    pub fn new(
        store: Arc<SecureStore>,
        identity: Arc<IdentityHolder>,
        settings: AuditSettings,
    ) -> Self {
        Self {
            store,
            identity,
            settings,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Append an event stamped with the current identity.
    ///
    /// The event is kept in memory even when the flush fails; the error
    /// is logged and returned so callers can notice lost durability.
    pub async fn record(
        &self,
        action: &str,
        resource: &str,
        mut details: Map<String, Value>,
    ) -> Result<AuditEvent> {
        let mut ledger = self.ledger.lock().await;
        self.ensure_loaded(&mut ledger).await;

        let profile = self.identity.current();
        details.insert(
            "userRole".to_string(),
            Value::String(profile.permissions.role.as_str().to_string()),
        );
        details.insert(
            "userPermissions".to_string(),
            Value::Array(
                profile
                    .permissions
                    .permissions
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );

        let prev_hash = ledger
            .events
            .last()
            .and_then(|e| e.chain.as_ref())
            .map(|c| c.hash.clone());

        let mut event = AuditEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            user_id: profile.subject_id().to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            details,
            chain: Some(ChainLink {
                prev_hash,
                hash: String::new(),
            }),
        };
        let hash = compute_event_hash(&event)?;
        if let Some(chain) = event.chain.as_mut() {
            chain.hash = hash;
        }

        ledger.events.push(event.clone());
        self.truncate(&mut ledger);
        debug!("Audit event {} on {}", action, resource);

        if let Err(e) = self.persist(&ledger).await {
            warn!("Failed to persist audit event: {}", e);
            return Err(e);
        }
        Ok(event)
    }

    /// The last `n` events, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<AuditEvent> {
        let mut ledger = self.ledger.lock().await;
        self.ensure_loaded(&mut ledger).await;
        let start = ledger.events.len().saturating_sub(n);
        ledger.events[start..].to_vec()
    }

    pub async fn by_actor(&self, user_id: &str) -> Vec<AuditEvent> {
        self.filtered(|e| e.user_id == user_id).await
    }

    pub async fn by_action(&self, action: &str) -> Vec<AuditEvent> {
        self.filtered(|e| e.action == action).await
    }

    pub async fn len(&self) -> usize {
        let mut ledger = self.ledger.lock().await;
        self.ensure_loaded(&mut ledger).await;
        ledger.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Broken indices of the in-memory ledger. Empty means intact.
    pub async fn verify(&self) -> Vec<usize> {
        let mut ledger = self.ledger.lock().await;
        self.ensure_loaded(&mut ledger).await;
        let checkpoint = if self.settings.checkpoint_truncated {
            ledger.checkpoint.as_deref()
        } else {
            None
        };
        verify_chain(&ledger.events, checkpoint)
    }

    /// Empty the ledger and persist the empty state.
    pub async fn clear(&self) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        ledger.loaded = true;
        ledger.events.clear();
        ledger.checkpoint = None;
        if self.settings.checkpoint_truncated
            && let Err(e) = self.store.remove(AUDIT_CHECKPOINT_KEY).await
        {
            warn!("Failed to clear audit checkpoint: {}", e);
        }
        self.persist(&ledger).await
    }

    async fn filtered<F>(&self, pred: F) -> Vec<AuditEvent>
    where
        F: Fn(&AuditEvent) -> bool,
    {
        let mut ledger = self.ledger.lock().await;
        self.ensure_loaded(&mut ledger).await;
        ledger.events.iter().filter(|&e| pred(e)).cloned().collect()
    }

    /// Hydrate once. Absent → empty; unreadable → reset (logged).
    async fn ensure_loaded(&self, ledger: &mut Ledger) {
        if ledger.loaded {
            return;
        }
        ledger.loaded = true;

        match self
            .store
            .get_or_migrate::<Value>(AUDIT_LOG_KEY, LEGACY_AUDIT_LOG_KEY)
            .await
        {
            None => {}
            Some(loaded) => match parse_ledger(loaded.value) {
                Ok(events) => ledger.events = events,
                Err(e) => {
                    warn!("{}; starting a new ledger", e);
                    ledger.events.clear();
                }
            },
        }

        if self.settings.checkpoint_truncated {
            ledger.checkpoint = self.store.get::<String>(AUDIT_CHECKPOINT_KEY).await;
        }
    }

    fn truncate(&self, ledger: &mut Ledger) {
        let max = self.settings.max_events.max(1);
        if ledger.events.len() <= max {
            return;
        }
        let excess = ledger.events.len() - max;
        let evicted: Vec<AuditEvent> = ledger.events.drain(..excess).collect();
        if self.settings.checkpoint_truncated {
            ledger.checkpoint = evicted
                .last()
                .and_then(|e| e.chain.as_ref())
                .map(|c| c.hash.clone());
        }
    }

    async fn persist(&self, ledger: &Ledger) -> Result<()> {
        self.store.set(AUDIT_LOG_KEY, &ledger.events).await?;
        if self.settings.checkpoint_truncated
            && let Some(cp) = ledger.checkpoint.as_ref()
        {
            self.store.set(AUDIT_CHECKPOINT_KEY, cp).await?;
        }
        // Legacy plaintext copy must not linger next to the secure ledger
        if let Err(e) = self.store.remove(LEGACY_AUDIT_LOG_KEY).await {
            debug!("Failed to remove legacy audit log: {}", e);
        }
        Ok(())
    }
}

fn parse_ledger(value: Value) -> Result<Vec<AuditEvent>> {
    if !value.is_array() {
        return Err(SecurityError::CorruptLedger(
            "persisted ledger is not an array".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|e| SecurityError::CorruptLedger(e.to_string()))
}

/// Compute hex-encoded SHA-256.
fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
