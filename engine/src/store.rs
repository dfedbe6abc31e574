//! Persistence store implementations.
//!
//! Two [`StateStore`] implementations ship with the crate:
//!
//! - [`MemoryStore`]: in-memory, for the simulation harness and tests. Write
//!   failures can be injected to exercise the engine's archive-abort path.
//! - [`FileStore`]: one JSON document per namespace under a state directory,
//!   for the CLI harness. Reads and writes go through `tokio::fs`, and every
//!   write rewrites the namespace document in full (the documents are small:
//!   settings, the activity ledger, the lock list, and the capped archive).
//!
//! Both implementations are cheaply cloneable; clones share the same
//! underlying state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::host::{HostError, Namespace, StateStore};

/// File name for the synced namespace document.
const SYNCED_FILE: &str = "settings.json";

/// File name for the local namespace document.
const LOCAL_FILE: &str = "state.json";

/// In-memory [`StateStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    namespaces: Arc<RwLock<HashMap<Namespace, Map<String, Value>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail with [`HostError::StoreUnavailable`].
    ///
    /// Reads keep succeeding, mirroring a store that has gone read-only.
    pub fn set_write_failures(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Seeds a value directly, bypassing failure injection.
    pub async fn seed(&self, namespace: Namespace, key: &str, value: Value) {
        self.namespaces
            .write()
            .await
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value);
    }
}

impl StateStore for MemoryStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(&namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), HostError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HostError::StoreUnavailable(
                "injected write failure".to_string(),
            ));
        }
        self.namespaces
            .write()
            .await
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// [`StateStore`] backed by JSON files in a state directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::StoreUnavailable`] if the directory cannot be
    /// created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, HostError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| HostError::StoreUnavailable(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// The directory holding the namespace documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, namespace: Namespace) -> PathBuf {
        match namespace {
            Namespace::Synced => self.dir.join(SYNCED_FILE),
            Namespace::Local => self.dir.join(LOCAL_FILE),
        }
    }

    async fn read_namespace(&self, namespace: Namespace) -> Result<Map<String, Value>, HostError> {
        let path = self.file_for(namespace);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Map::new());
            }
            Err(e) => {
                return Err(HostError::StoreUnavailable(format!(
                    "{}: {e}",
                    path.display()
                )));
            }
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                // A corrupt document is treated as empty rather than fatal;
                // the next write replaces it.
                debug!(path = %path.display(), "discarding malformed namespace document");
                Ok(Map::new())
            }
        }
    }

    async fn write_namespace(
        &self,
        namespace: Namespace,
        map: &Map<String, Value>,
    ) -> Result<(), HostError> {
        let path = self.file_for(namespace);
        let bytes = serde_json::to_vec_pretty(map)
            .map_err(|e| HostError::StoreUnavailable(e.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| HostError::StoreUnavailable(format!("{}: {e}", path.display())))
    }
}

impl StateStore for FileStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self.read_namespace(namespace).await?.get(key).cloned())
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), HostError> {
        let mut map = self.read_namespace(namespace).await?;
        map.insert(key.to_string(), value);
        self.write_namespace(namespace, &map).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_roundtrip() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();

            assert!(store.get(Namespace::Local, "missing").await.unwrap().is_none());

            store
                .set(Namespace::Local, "key", json!({"a": 1}))
                .await
                .unwrap();
            let value = store.get(Namespace::Local, "key").await.unwrap().unwrap();
            assert_eq!(value["a"], 1);
        });
    }

    #[tokio::test]
    async fn memory_store_namespaces_are_independent() {
        let store = MemoryStore::new();

        store.set(Namespace::Synced, "key", json!(1)).await.unwrap();
        store.set(Namespace::Local, "key", json!(2)).await.unwrap();

        assert_eq!(store.get(Namespace::Synced, "key").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get(Namespace::Local, "key").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn memory_store_write_failure_injection() {
        let store = MemoryStore::new();
        store.set(Namespace::Local, "key", json!(1)).await.unwrap();

        store.set_write_failures(true);
        let err = store.set(Namespace::Local, "key", json!(2)).await.unwrap_err();
        assert!(matches!(err, HostError::StoreUnavailable(_)));

        // Reads still work and the old value is intact.
        assert_eq!(store.get(Namespace::Local, "key").await.unwrap(), Some(json!(1)));

        store.set_write_failures(false);
        store.set(Namespace::Local, "key", json!(2)).await.unwrap();
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.get(Namespace::Local, "missing").await.unwrap().is_none());

        store
            .set(Namespace::Local, "tabActivity", json!({"1": 1000}))
            .await
            .unwrap();
        store
            .set(Namespace::Synced, "autoCloseSettings", json!({"enabled": false}))
            .await
            .unwrap();

        // Reopen to prove durability.
        let reopened = FileStore::open(dir.path()).unwrap();
        let activity = reopened
            .get(Namespace::Local, "tabActivity")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(activity["1"], 1000);

        let settings = reopened
            .get(Namespace::Synced, "autoCloseSettings")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settings["enabled"], false);
    }

    #[tokio::test]
    async fn file_store_preserves_sibling_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set(Namespace::Local, "a", json!(1)).await.unwrap();
        store.set(Namespace::Local, "b", json!(2)).await.unwrap();

        assert_eq!(store.get(Namespace::Local, "a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get(Namespace::Local, "b").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn file_store_tolerates_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        tokio::fs::write(dir.path().join("state.json"), b"not json")
            .await
            .unwrap();

        assert!(store.get(Namespace::Local, "key").await.unwrap().is_none());
        store.set(Namespace::Local, "key", json!(1)).await.unwrap();
        assert_eq!(store.get(Namespace::Local, "key").await.unwrap(), Some(json!(1)));
    }
}
