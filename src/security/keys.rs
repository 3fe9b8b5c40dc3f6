//! Device key management.
//!
//! The device key is a 32-byte AES-256 key generated once per
//! installation from the OS CSPRNG. It is stored base64-encoded in two
//! places:
//!
//! 1. **Platform-preferred**: `<data_dir>/keys/device.key` through a
//!    [`KeyFileStore`] (0600 on Unix). Optional.
//! 2. **Fallback**: the [`KvBackend`] under [`DEVICE_KEY_FALLBACK`].
//!    Authoritative; a key is only considered persisted once this write
//!    succeeds, unless the preferred write succeeded instead.
//!
//! # Lifecycle
//!
//! [`KeyManager::get_or_create_key`] loads the key on first use (preferred
//! location first, then fallback), generates one if neither holds a valid
//! key, and caches it for the process lifetime. Concurrent first callers
//! are coalesced onto a single in-flight initialization, so two different
//! keys are never created for the same device.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngExt;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::backend::{KeyFileStore, KvBackend};
use super::error::{Result, SecurityError};

pub const DEVICE_KEY_LEN: usize = 32;

/// Directory and filename of the key inside the preferred store.
pub const DEVICE_KEY_DIR: &str = "keys";
pub const DEVICE_KEY_FILENAME: &str = "device.key";

/// Key→string backend entry holding the fallback copy.
pub const DEVICE_KEY_FALLBACK: &str = "localguard_device_key_b64";

/// Raw device key material. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceKey([u8; DEVICE_KEY_LEN]);

impl DeviceKey {
    pub fn from_bytes(bytes: [u8; DEVICE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a base64 key, rejecting anything that is not exactly 32 bytes.
    pub fn from_base64(b64: &str) -> Option<Self> {
        let bytes = BASE64.decode(b64.trim()).ok()?;
        let arr: [u8; DEVICE_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; DEVICE_KEY_LEN] {
        &self.0
    }

    fn generate() -> Self {
        let mut key = [0u8; DEVICE_KEY_LEN];
        rand::rng().fill(&mut key);
        Self(key)
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceKey").field(&"[REDACTED]").finish()
    }
}

/// Sole owner of device key material.
///
/// Construct exactly one per process (see [`crate::app::App`]); every
/// component needing the key borrows it through this manager.
pub struct KeyManager {
    preferred: Option<Arc<dyn KeyFileStore>>,
    fallback: Arc<dyn KvBackend>,
    cached: OnceCell<DeviceKey>,
}

impl KeyManager {
    pub fn new(preferred: Option<Arc<dyn KeyFileStore>>, fallback: Arc<dyn KvBackend>) -> Self {
        Self {
            preferred,
            fallback,
            cached: OnceCell::new(),
        }
    }

    /// Return the device key, creating and persisting it on first use.
    ///
    /// Idempotent. A failed initialization is not cached; the next call
    /// retries.
    pub async fn get_or_create_key(&self) -> Result<DeviceKey> {
        self.cached
            .get_or_try_init(|| self.load_or_create())
            .await
            .cloned()
    }

    async fn load_or_create(&self) -> Result<DeviceKey> {
        if let Some(key) = self.read_preferred().await {
            debug!("Loaded device key from platform-preferred location");
            return Ok(key);
        }
        if let Some(key) = self.read_fallback().await {
            debug!("Loaded device key from fallback store");
            return Ok(key);
        }

        let key = DeviceKey::generate();
        let b64 = key.to_base64();

        let preferred_ok = self.write_preferred(&b64).await;
        let fallback_ok = match self.fallback.set(DEVICE_KEY_FALLBACK, &b64).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write device key to fallback store: {}", e);
                false
            }
        };

        if !preferred_ok && !fallback_ok {
            return Err(SecurityError::StorageUnavailable(
                "no writable location for the device key".to_string(),
            ));
        }

        info!("Generated new device key");
        Ok(key)
    }

    async fn read_preferred(&self) -> Option<DeviceKey> {
        let store = self.preferred.as_ref()?;
        let path = key_path();
        match store.exists(&path).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                debug!("Preferred key location unavailable: {}", e);
                return None;
            }
        }
        let text = match store.read_text(&path).await {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to read device key file: {}", e);
                return None;
            }
        };
        let key = DeviceKey::from_base64(&text);
        if key.is_none() {
            warn!("Device key file is malformed, ignoring it");
        }
        key
    }

    async fn read_fallback(&self) -> Option<DeviceKey> {
        let text = match self.fallback.get(DEVICE_KEY_FALLBACK).await {
            Ok(Some(t)) => t,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read fallback device key: {}", e);
                return None;
            }
        };
        let key = DeviceKey::from_base64(&text);
        if key.is_none() {
            warn!("Fallback device key is malformed, ignoring it");
        }
        key
    }

    /// Best-effort; failures are logged and reported as `false`.
    async fn write_preferred(&self, b64: &str) -> bool {
        let Some(store) = self.preferred.as_ref() else {
            return false;
        };
        let result = async {
            if !store.exists(DEVICE_KEY_DIR).await.unwrap_or(false) {
                store.create_directory(DEVICE_KEY_DIR).await?;
            }
            store.write_text(&key_path(), b64).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write device key to preferred location: {}", e);
                false
            }
        }
    }
}

fn key_path() -> String {
    format!("{}/{}", DEVICE_KEY_DIR, DEVICE_KEY_FILENAME)
}
