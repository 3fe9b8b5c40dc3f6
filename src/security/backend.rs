//! Underlying persistence backends.
//!
//! Two seams sit under the secure store:
//!
//! - [`KvBackend`]: a key→string store (`get`, `set`, `remove`). Every
//!   persisted artifact goes through one of these.
//! - [`KeyFileStore`]: the platform-preferred file store used only for
//!   the device key. Optional; when absent the key manager falls back to
//!   the [`KvBackend`].
//!
//! [`FileKvBackend`] keeps one file per key under a directory and writes
//! atomically (temp file + rename). [`MemoryKvBackend`] is process-local.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> io::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> io::Result<()>;
    async fn remove(&self, key: &str) -> io::Result<()>;
}

/// Platform-preferred text file store. Paths are relative to its root.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyFileStore: Send + Sync {
    async fn exists(&self, path: &str) -> io::Result<bool>;
    async fn read_text(&self, path: &str) -> io::Result<String>;
    async fn write_text(&self, path: &str, contents: &str) -> io::Result<()>;
    async fn create_directory(&self, path: &str) -> io::Result<()>;
}

/// Directory-backed key→string store.
#[derive(Debug, Clone)]
pub struct FileKvBackend {
    dir: PathBuf,
}

impl FileKvBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(sanitize_key(key))
    }
}

/// Map a storage key onto a single safe filename component.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl KvBackend for FileKvBackend {
    async fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, value).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory key→string store.
#[derive(Debug, Default)]
pub struct MemoryKvBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// File store rooted at the application data directory.
#[derive(Debug, Clone)]
pub struct FsKeyFileStore {
    root: PathBuf,
}

impl FsKeyFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl KeyFileStore for FsKeyFileStore {
    async fn exists(&self, path: &str) -> io::Result<bool> {
        fs::try_exists(self.resolve(path)).await
    }

    async fn read_text(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.resolve(path)).await
    }

    async fn write_text(&self, path: &str, contents: &str) -> io::Result<()> {
        let full = self.resolve(path);
        fs::write(&full, contents).await?;

        // Owner read/write only on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path)).await
    }
}
