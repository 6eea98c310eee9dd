//! Object storage for uploaded blobs
//!
//! Files are opaque bytes referenced by key; the platform never parses
//! them here. A failed upload surfaces as a gateway error and leaves no
//! database rows behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{Error, Result};

/// Blob storage behind the ingest orchestrator.
///
/// Implementations: [`FsObjectStore`] (local filesystem) and
/// [`MemoryObjectStore`] (tests).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under an opaque key.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Retrieve bytes by key.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a stored object; missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Filesystem-backed object store rooted at a configured directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        // Keys are generated server-side, but reject traversal anyway.
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(Error::Storage(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(Path::new(key)))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("failed to create {parent:?}: {e}")))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::Storage(format!("failed to write {key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Storage(format!("failed to read {key}: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("failed to delete {key}: {e}"))),
        }
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

/// In-memory object store for tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
    fail_puts: std::sync::atomic::AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent puts fail, simulating an unreachable backend.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts
            .store(fail, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        if self.fail_puts.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(Error::Storage("object storage unavailable".to_string()));
        }
        self.objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(key)
            .map(|o| o.clone())
            .ok_or_else(|| Error::Storage(format!("object {key} not found")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("2026/abc-roadmap.pdf", b"%PDF-").await.unwrap();
        assert_eq!(store.get("2026/abc-roadmap.pdf").await.unwrap(), b"%PDF-");

        store.delete("2026/abc-roadmap.pdf").await.unwrap();
        assert!(store.get("2026/abc-roadmap.pdf").await.is_err());
        // Deleting again is fine.
        store.delete("2026/abc-roadmap.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.put("../escape.pdf", b"x").await.is_err());
        assert!(store.put("a//b.pdf", b"x").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_can_simulate_outage() {
        let store = MemoryObjectStore::new();
        store.put("k", b"v").await.unwrap();

        store.fail_puts(true);
        assert!(matches!(
            store.put("k2", b"v").await,
            Err(Error::Storage(_))
        ));
        assert_eq!(store.len(), 1);
    }
}
