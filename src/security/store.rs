//! Encrypt-on-write / decrypt-on-read key-value persistence.
//!
//! # Wire format
//!
//! With encryption on, a value is stored as
//! `base64(nonce ‖ AES-256-GCM(key, {"v": "<json>"}))` with a fresh
//! 96-bit random nonce per write. With encryption off it is stored as the
//! plain JSON text.
//!
//! # Read interpretation
//!
//! Reads follow the *current* [`EncryptionToggle`], not the mode the value
//! was written in. With encryption on, the chain is
//! decrypt → plaintext JSON parse → `None`, so values written before
//! encryption was enabled stay readable. Read failures are logged, never
//! returned.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::backend::KvBackend;
use super::error::{Result, SecurityError};
use super::keys::{DeviceKey, KeyManager};

pub const NONCE_LEN: usize = 12;

/// Shared, runtime-toggleable "encrypt local data" setting.
#[derive(Debug, Clone)]
pub struct EncryptionToggle(Arc<AtomicBool>);

impl EncryptionToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

/// Inner envelope encrypted under the device key.
#[derive(Serialize, Deserialize)]
struct Envelope {
    v: String,
}

/// Encrypt a string under the device key. Output is base64(nonce ‖ ciphertext).
pub fn seal(key: &DeviceKey, data: &str) -> Result<String> {
    let plaintext = serde_json::to_vec(&Envelope { v: data.to_string() })?;
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| SecurityError::StorageUnavailable("invalid device key length".into()))?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| SecurityError::StorageUnavailable("encryption failed".into()))?;

    let mut merged = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    merged.extend_from_slice(&nonce);
    merged.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(merged))
}

/// Decrypt a payload produced by [`seal`].
pub fn open(key: &DeviceKey, payload: &str) -> Result<String> {
    let raw = BASE64
        .decode(payload.trim())
        .map_err(|_| SecurityError::DecryptionFailure)?;
    if raw.len() <= NONCE_LEN {
        return Err(SecurityError::DecryptionFailure);
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| SecurityError::DecryptionFailure)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecurityError::DecryptionFailure)?;

    let envelope: Envelope =
        serde_json::from_slice(&plaintext).map_err(|_| SecurityError::DecryptionFailure)?;
    Ok(envelope.v)
}

/// Result of a read that may have moved a value off a legacy key.
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated<T> {
    pub value: T,
    pub migrated: bool,
}

/// The only component that encodes and decodes persisted secure values.
pub struct SecureStore {
    backend: Arc<dyn KvBackend>,
    keys: Arc<KeyManager>,
    encryption: EncryptionToggle,
}

impl SecureStore {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        keys: Arc<KeyManager>,
        encryption: EncryptionToggle,
    ) -> Self {
        Self {
            backend,
            keys,
            encryption,
        }
    }

    pub fn encryption(&self) -> &EncryptionToggle {
        &self.encryption
    }

    /// Serialize `value` to JSON and write it, encrypting if the toggle is on.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let stored = if self.encryption.is_enabled() {
            let device_key = self.keys.get_or_create_key().await?;
            seal(&device_key, &json)?
        } else {
            json
        };

        self.backend
            .set(key, &stored)
            .await
            .map_err(|e| SecurityError::StorageUnavailable(format!("write `{}`: {}", key, e)))
    }

    /// Read and decode a value. `None` when absent or unreadable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let stored = match self.backend.get(key).await {
            Ok(Some(s)) if !s.is_empty() => s,
            Ok(_) => return None,
            Err(e) => {
                warn!("Failed to read `{}` from storage: {}", key, e);
                return None;
            }
        };

        if self.encryption.is_enabled() {
            match self.decrypt_to::<T>(&stored).await {
                Ok(value) => return Some(value),
                Err(e) => {
                    debug!(
                        "Failed to decrypt `{}` ({}), attempting to parse as plaintext",
                        key, e
                    );
                }
            }
        }

        match serde_json::from_str::<T>(&stored) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to parse stored value `{}`: {}", key, e);
                None
            }
        }
    }

    /// Read `key`; if absent, move a plaintext value from `legacy_key` into it.
    pub async fn get_or_migrate<T: Serialize + DeserializeOwned>(
        &self,
        key: &str,
        legacy_key: &str,
    ) -> Option<Migrated<T>> {
        if let Some(value) = self.get::<T>(key).await {
            return Some(Migrated {
                value,
                migrated: false,
            });
        }

        let legacy = match self.backend.get(legacy_key).await {
            Ok(Some(s)) => s,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read legacy key `{}`: {}", legacy_key, e);
                return None;
            }
        };
        let value: T = match serde_json::from_str(&legacy) {
            Ok(v) => v,
            Err(e) => {
                warn!("Legacy value `{}` is not valid JSON: {}", legacy_key, e);
                return None;
            }
        };

        if let Err(e) = self.set(key, &value).await {
            warn!("Failed to migrate `{}` to `{}`: {}", legacy_key, key, e);
        } else if let Err(e) = self.backend.remove(legacy_key).await {
            warn!("Failed to remove legacy key `{}`: {}", legacy_key, e);
        }

        Some(Migrated {
            value,
            migrated: true,
        })
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.backend
            .remove(key)
            .await
            .map_err(|e| SecurityError::StorageUnavailable(format!("remove `{}`: {}", key, e)))
    }

    async fn decrypt_to<T: DeserializeOwned>(&self, stored: &str) -> Result<T> {
        let device_key = self.keys.get_or_create_key().await?;
        let json = open(&device_key, stored)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::backend::{MemoryKvBackend, MockKvBackend};
    use crate::security::keys::DEVICE_KEY_LEN;
    use serde_json::json;
    use std::io;

    fn store_with(encrypt: bool) -> (SecureStore, Arc<MemoryKvBackend>) {
        let backend = Arc::new(MemoryKvBackend::new());
        let keys = Arc::new(KeyManager::new(None, backend.clone()));
        let store = SecureStore::new(backend.clone(), keys, EncryptionToggle::new(encrypt));
        (store, backend)
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = DeviceKey::from_bytes([3u8; DEVICE_KEY_LEN]);
        for value in ["", "{}", "{\"role\":\"admin\"}", "ünïcödé ✓"] {
            let sealed = seal(&key, value).unwrap();
            assert_eq!(open(&key, &sealed).unwrap(), value);
        }
    }

    #[test]
    fn every_seal_uses_a_fresh_nonce() {
        let key = DeviceKey::from_bytes([3u8; DEVICE_KEY_LEN]);
        let a = seal(&key, "same").unwrap();
        let b = seal(&key, "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn open_rejects_wrong_key_and_tampering() {
        let key = DeviceKey::from_bytes([3u8; DEVICE_KEY_LEN]);
        let other = DeviceKey::from_bytes([4u8; DEVICE_KEY_LEN]);
        let sealed = seal(&key, "secret").unwrap();

        assert!(matches!(
            open(&other, &sealed),
            Err(SecurityError::DecryptionFailure)
        ));

        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(matches!(
            open(&key, &BASE64.encode(raw)),
            Err(SecurityError::DecryptionFailure)
        ));

        assert!(open(&key, "not base64 at all!").is_err());
        assert!(open(&key, &BASE64.encode([0u8; 5])).is_err());
    }

    #[tokio::test]
    async fn encrypted_values_are_not_plaintext_at_rest() {
        let (store, backend) = store_with(true);
        store.set("profile", &json!({"role": "admin"})).await.unwrap();

        let raw = backend.get("profile").await.unwrap().unwrap();
        assert!(!raw.contains("admin"));

        let read: serde_json::Value = store.get("profile").await.unwrap();
        assert_eq!(read, json!({"role": "admin"}));
    }

    #[tokio::test]
    async fn plaintext_mode_writes_json() {
        let (store, backend) = store_with(false);
        store.set("profile", &json!({"role": "user"})).await.unwrap();
        assert_eq!(
            backend.get("profile").await.unwrap().as_deref(),
            Some("{\"role\":\"user\"}")
        );
    }

    #[tokio::test]
    async fn enabling_encryption_keeps_plaintext_data_readable() {
        let (store, _backend) = store_with(false);
        store.set("profile", &json!({"role": "user"})).await.unwrap();

        store.encryption().set(true);

        let read: serde_json::Value = store.get("profile").await.unwrap();
        assert_eq!(read, json!({"role": "user"}));
    }

    #[tokio::test]
    async fn disabling_encryption_makes_ciphertext_unreadable_not_fatal() {
        let (store, _backend) = store_with(true);
        store.set("profile", &json!({"role": "user"})).await.unwrap();

        store.encryption().set(false);
        assert_eq!(store.get::<serde_json::Value>("profile").await, None);

        // Flipping back recovers it
        store.encryption().set(true);
        assert!(store.get::<serde_json::Value>("profile").await.is_some());
    }

    #[tokio::test]
    async fn garbage_reads_as_none() {
        let (store, backend) = store_with(true);
        backend.set("profile", "%%% garbage %%%").await.unwrap();
        assert_eq!(store.get::<serde_json::Value>("profile").await, None);
        assert_eq!(store.get::<serde_json::Value>("missing").await, None);
    }

    #[tokio::test]
    async fn backend_read_error_reads_as_none() {
        let mut backend = MockKvBackend::new();
        backend
            .expect_get()
            .returning(|_| Err(io::Error::other("disk gone")));
        let backend: Arc<dyn KvBackend> = Arc::new(backend);
        let keys = Arc::new(KeyManager::new(None, backend.clone()));
        let store = SecureStore::new(backend, keys, EncryptionToggle::new(true));

        assert_eq!(store.get::<serde_json::Value>("profile").await, None);
    }

    #[tokio::test]
    async fn write_failure_is_storage_unavailable() {
        let mut backend = MockKvBackend::new();
        backend.expect_get().returning(|_| Ok(None));
        backend
            .expect_set()
            .returning(|_, _| Err(io::Error::other("read-only")));
        let backend: Arc<dyn KvBackend> = Arc::new(backend);
        let keys = Arc::new(KeyManager::new(None, backend.clone()));
        let store = SecureStore::new(backend, keys, EncryptionToggle::new(false));

        let err = store.set("profile", &json!({})).await.unwrap_err();
        assert!(matches!(err, SecurityError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn legacy_value_is_migrated_once() {
        let (store, backend) = store_with(true);
        backend
            .set("session", "{\"userId\":\"admin\"}")
            .await
            .unwrap();

        let first = store
            .get_or_migrate::<serde_json::Value>("session.secure", "session")
            .await
            .unwrap();
        assert!(first.migrated);
        assert_eq!(first.value, json!({"userId": "admin"}));
        assert_eq!(backend.get("session").await.unwrap(), None);

        let second = store
            .get_or_migrate::<serde_json::Value>("session.secure", "session")
            .await
            .unwrap();
        assert!(!second.migrated);
        assert_eq!(second.value, first.value);
    }

    #[tokio::test]
    async fn remove_deletes_value() {
        let (store, _backend) = store_with(true);
        store.set("k", &1u32).await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get::<u32>("k").await, None);
    }
}
