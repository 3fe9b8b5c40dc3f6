//! Current-identity holder.
//!
//! Holds the active [`UserProfile`] in a `watch` channel so observers can
//! react to identity changes, and persists it through the secure store
//! under [`PROFILE_KEY`].
//!
//! On load the stored profile goes through [`repair_profile`], an explicit
//! validation pass that returns the corrected value plus a flag. The
//! granted permission set always ends up equal to the canonical set for
//! the role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::{Result, SecurityError};
use super::offline::OFFLINE_SESSION_KEY;
use super::permissions::{PermissionSnapshot, Role, has_permission};
use super::store::SecureStore;

pub const PROFILE_KEY: &str = "user_profile.secure";
pub const LEGACY_PROFILE_KEY: &str = "user_profile";

/// Acting-subject name for events recorded without an identity.
pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub username: Option<String>,
    #[serde(default)]
    pub licenses: Vec<String>,
    pub permissions: PermissionSnapshot,
}

impl UserProfile {
    /// Signed-out profile with the `user` role.
    pub fn anonymous() -> Self {
        Self {
            username: None,
            licenses: Vec::new(),
            permissions: PermissionSnapshot::default(),
        }
    }

    pub fn signed_in(subject_id: &str, role: Role) -> Self {
        Self {
            username: Some(subject_id.to_string()),
            licenses: Vec::new(),
            permissions: PermissionSnapshot::for_role(role),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Username, or [`ANONYMOUS`].
    pub fn subject_id(&self) -> &str {
        match self.username.as_deref() {
            Some(u) if !u.is_empty() => u,
            _ => ANONYMOUS,
        }
    }
}

impl Default for UserProfile {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Profile as it may appear on disk: the role is free text and the
/// snapshot may be missing entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub licenses: Vec<String>,
    #[serde(default)]
    pub permissions: Option<StoredSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Output of a validation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired<T> {
    pub value: T,
    pub corrected: bool,
}

/// Validate a stored profile against the permission model.
///
/// - missing snapshot → default `user` snapshot
/// - unknown role → default `user` snapshot
/// - granted set differing from the role's canonical set → canonical set
pub fn repair_profile(stored: StoredProfile) -> Repaired<UserProfile> {
    let mut corrected = false;

    let permissions = match stored.permissions {
        None => {
            corrected = true;
            PermissionSnapshot::default()
        }
        Some(snap) => match Role::parse(&snap.role) {
            None => {
                corrected = true;
                PermissionSnapshot::default()
            }
            Some(role) => {
                let granted: BTreeSet<String> = snap.permissions.into_iter().collect();
                let canonical = role.permissions();
                if &granted != canonical {
                    corrected = true;
                }
                PermissionSnapshot {
                    role,
                    permissions: canonical.clone(),
                    is_active: snap.is_active,
                    expires_at: snap.expires_at,
                }
            }
        },
    };

    Repaired {
        value: UserProfile {
            username: stored.username,
            licenses: stored.licenses,
            permissions,
        },
        corrected,
    }
}

/// Mutable cell of the current identity.
pub struct IdentityHolder {
    store: Arc<SecureStore>,
    tx: watch::Sender<UserProfile>,
}

impl IdentityHolder {
    pub fn new(store: Arc<SecureStore>) -> Self {
        let (tx, _rx) = watch::channel(UserProfile::anonymous());
        Self { store, tx }
    }

    pub fn current(&self) -> UserProfile {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UserProfile> {
        self.tx.subscribe()
    }

    /// Load the persisted profile, migrating the legacy key and repairing
    /// the permission snapshot. Corrections are written back.
    pub async fn hydrate(&self) -> Option<Repaired<UserProfile>> {
        let loaded = self
            .store
            .get_or_migrate::<StoredProfile>(PROFILE_KEY, LEGACY_PROFILE_KEY)
            .await?;
        if loaded.migrated {
            info!("Migrated legacy plaintext profile to secure storage");
        }

        let repaired = repair_profile(loaded.value);
        if repaired.corrected {
            warn!(
                "Stored profile permissions did not match role `{}`, corrected",
                repaired.value.permissions.role
            );
            if let Err(e) = self.store.set(PROFILE_KEY, &repaired.value).await {
                warn!("Failed to persist corrected profile: {}", e);
            }
        }

        self.tx.send_replace(repaired.value.clone());
        debug!("Hydrated identity for {}", repaired.value.subject_id());
        Some(repaired)
    }

    /// Replace the profile. Memory is updated even if persistence fails.
    pub async fn set(&self, profile: UserProfile) -> Result<()> {
        self.tx.send_replace(profile.clone());
        self.store.set(PROFILE_KEY, &profile).await
    }

    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut UserProfile),
    {
        let mut profile = self.current();
        f(&mut profile);
        self.set(profile).await
    }

    /// Start an identity for a validated subject.
    pub async fn login(&self, subject_id: &str, role: Role) -> Result<UserProfile> {
        let profile = UserProfile::signed_in(subject_id, role);
        self.set(profile.clone()).await?;
        Ok(profile)
    }

    /// Clear the identity and its persisted records.
    pub async fn logout(&self) {
        for key in [LEGACY_PROFILE_KEY, PROFILE_KEY, OFFLINE_SESSION_KEY] {
            if let Err(e) = self.store.remove(key).await {
                warn!("Failed to clear `{}` on logout: {}", key, e);
            }
        }
        self.tx.send_replace(UserProfile::anonymous());
    }

    pub fn has_permission(&self, permission_id: &str) -> bool {
        has_permission(&self.current().permissions, permission_id)
    }

    /// Change the current role. Requires `role:manage`.
    pub async fn update_role(&self, role: Role) -> Result<()> {
        if !self.has_permission("role:manage") {
            warn!("Unauthorized role change attempt");
            return Err(SecurityError::UnauthorizedMutation {
                permission: "role:manage".to_string(),
            });
        }

        self.update(|p| {
            p.permissions.role = role;
            p.permissions.permissions = role.permissions().clone();
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::backend::{KvBackend, MemoryKvBackend};
    use crate::security::keys::KeyManager;
    use crate::security::store::EncryptionToggle;

    fn holder(encrypt: bool) -> (IdentityHolder, Arc<SecureStore>, Arc<MemoryKvBackend>) {
        let backend = Arc::new(MemoryKvBackend::new());
        let keys = Arc::new(KeyManager::new(None, backend.clone()));
        let store = Arc::new(SecureStore::new(
            backend.clone(),
            keys,
            EncryptionToggle::new(encrypt),
        ));
        (IdentityHolder::new(store.clone()), store, backend)
    }

    fn stored(role: &str, perms: &[&str]) -> StoredProfile {
        StoredProfile {
            username: Some("alice".into()),
            licenses: vec![],
            permissions: Some(StoredSnapshot {
                role: role.into(),
                permissions: perms.iter().map(|s| s.to_string()).collect(),
                is_active: true,
                expires_at: None,
            }),
        }
    }

    #[test]
    fn repair_leaves_canonical_profile_alone() {
        let perms: Vec<&str> = Role::User.permissions().iter().map(|s| s.as_str()).collect();
        let r = repair_profile(stored("user", &perms));
        assert!(!r.corrected);
        assert_eq!(r.value.permissions, PermissionSnapshot::for_role(Role::User));
    }

    #[test]
    fn repair_strips_escalated_permissions() {
        let r = repair_profile(stored("user", &["cheat:view", "system:admin"]));
        assert!(r.corrected);
        assert_eq!(r.value.permissions.role, Role::User);
        assert!(!r.value.permissions.permissions.contains("system:admin"));
        assert_eq!(&r.value.permissions.permissions, Role::User.permissions());
    }

    #[test]
    fn repair_fills_missing_permissions() {
        let r = repair_profile(stored("developer", &["cheat:view"]));
        assert!(r.corrected);
        assert_eq!(&r.value.permissions.permissions, Role::Developer.permissions());
    }

    #[test]
    fn repair_resets_unknown_role() {
        let r = repair_profile(stored("superuser", &["system:admin"]));
        assert!(r.corrected);
        assert_eq!(r.value.permissions, PermissionSnapshot::default());
        assert_eq!(r.value.username.as_deref(), Some("alice"));
    }

    #[test]
    fn repair_handles_missing_snapshot() {
        let r = repair_profile(StoredProfile {
            username: Some("bob".into()),
            licenses: vec!["lic-1".into()],
            permissions: None,
        });
        assert!(r.corrected);
        assert_eq!(r.value.licenses, vec!["lic-1".to_string()]);
        assert_eq!(r.value.permissions.role, Role::User);
    }

    #[tokio::test]
    async fn hydrate_repairs_and_persists() {
        let (holder, store, _) = holder(true);
        store
            .set(PROFILE_KEY, &stored("reseller", &["system:admin"]))
            .await
            .unwrap();

        let r = holder.hydrate().await.unwrap();
        assert!(r.corrected);
        assert_eq!(holder.current().permissions.role, Role::Reseller);
        assert!(!holder.has_permission("system:admin"));

        // Written back: a second hydrate needs no correction
        let again = holder.hydrate().await.unwrap();
        assert!(!again.corrected);
    }

    #[tokio::test]
    async fn hydrate_migrates_legacy_plaintext_profile() {
        let (holder, _, backend) = holder(true);
        let legacy = serde_json::to_string(&UserProfile::signed_in("carol", Role::Developer)).unwrap();
        backend.set(LEGACY_PROFILE_KEY, &legacy).await.unwrap();

        let r = holder.hydrate().await.unwrap();
        assert!(!r.corrected);
        assert_eq!(holder.current().subject_id(), "carol");
        assert_eq!(backend.get(LEGACY_PROFILE_KEY).await.unwrap(), None);
        assert!(backend.get(PROFILE_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn hydrate_with_nothing_stored_keeps_anonymous() {
        let (holder, _, _) = holder(true);
        assert!(holder.hydrate().await.is_none());
        assert!(!holder.current().is_authenticated());
        assert_eq!(holder.current().subject_id(), ANONYMOUS);
    }

    #[tokio::test]
    async fn plaintext_profile_survives_enabling_encryption() {
        let (holder, store, _) = holder(false);
        holder.login("dave", Role::User).await.unwrap();

        store.encryption().set(true);

        let fresh = IdentityHolder::new(store);
        let r = fresh.hydrate().await.unwrap();
        assert_eq!(r.value.subject_id(), "dave");
        assert_eq!(r.value.permissions.role, Role::User);
    }

    #[tokio::test]
    async fn logout_clears_records_and_notifies_subscribers() {
        let (holder, _, backend) = holder(true);
        let mut rx = holder.subscribe();
        holder.login("erin", Role::Admin).await.unwrap();
        backend.set(OFFLINE_SESSION_KEY, "{}").await.unwrap();

        holder.logout().await;

        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_authenticated());
        assert_eq!(backend.get(PROFILE_KEY).await.unwrap(), None);
        assert_eq!(backend.get(OFFLINE_SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn role_change_requires_role_manage() {
        let (holder, _, _) = holder(true);
        holder.login("frank", Role::Developer).await.unwrap();

        let err = holder.update_role(Role::Admin).await.unwrap_err();
        assert!(matches!(err, SecurityError::UnauthorizedMutation { .. }));
        assert_eq!(holder.current().permissions.role, Role::Developer);
    }

    #[tokio::test]
    async fn admin_can_change_role() {
        let (holder, _, _) = holder(true);
        holder.login("grace", Role::Admin).await.unwrap();

        holder.update_role(Role::Reseller).await.unwrap();
        let p = holder.current();
        assert_eq!(p.permissions.role, Role::Reseller);
        assert_eq!(&p.permissions.permissions, Role::Reseller.permissions());
    }
}
