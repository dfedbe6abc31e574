//! Manually locked tabs.
//!
//! A locked tab is never auto-closed, regardless of how long it has been
//! inactive. Locks are created and removed only by explicit user action,
//! survive process restarts, and are pruned when the underlying tab goes
//! away so stale ids do not accumulate.
//!
//! The set is stored in the local namespace as a list of tab ids under the
//! `"lockedTabs"` key.

use std::collections::HashSet;

use tracing::debug;

use crate::host::{HostError, Namespace, StateStore, TabId};

/// Storage key for the lock set in the local namespace.
pub const LOCKS_KEY: &str = "lockedTabs";

/// Set of tabs vetoed from auto-close.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSet {
    tabs: HashSet<TabId>,
}

impl LockSet {
    /// Creates an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the lock set from durable storage.
    ///
    /// An absent document yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the store is unavailable.
    pub async fn hydrate<S: StateStore>(store: &S) -> Result<Self, HostError> {
        let tabs = match store.get(Namespace::Local, LOCKS_KEY).await? {
            Some(value) => match serde_json::from_value::<HashSet<TabId>>(value) {
                Ok(tabs) => tabs,
                Err(e) => {
                    debug!(error = %e, "discarding malformed lock document");
                    HashSet::new()
                }
            },
            None => HashSet::new(),
        };

        debug!(locked = tabs.len(), "lock set hydrated");
        Ok(Self { tabs })
    }

    /// Locks a tab. Idempotent; returns `true` if the tab was newly locked.
    pub fn lock(&mut self, tab_id: TabId) -> bool {
        self.tabs.insert(tab_id)
    }

    /// Unlocks a tab. Idempotent; returns `true` if the tab was locked.
    pub fn unlock(&mut self, tab_id: TabId) -> bool {
        self.tabs.remove(&tab_id)
    }

    /// Returns `true` if the tab is locked.
    #[must_use]
    pub fn is_locked(&self, tab_id: TabId) -> bool {
        self.tabs.contains(&tab_id)
    }

    /// Drops the lock for a tab that no longer exists.
    ///
    /// Semantically identical to [`Self::unlock`], but named for the
    /// tab-removal pruning path.
    pub fn prune(&mut self, tab_id: TabId) -> bool {
        self.tabs.remove(&tab_id)
    }

    /// Number of locked tabs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    /// Returns `true` if no tabs are locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Writes the lock set to durable storage.
    ///
    /// Ids are sorted so the stored document is stable across writes.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the write fails; the in-memory set is
    /// unaffected.
    pub async fn persist<S: StateStore>(&self, store: &S) -> Result<(), HostError> {
        let mut ids: Vec<TabId> = self.tabs.iter().copied().collect();
        ids.sort_unstable();
        let value = serde_json::to_value(ids)
            .map_err(|e| HostError::StoreUnavailable(e.to_string()))?;
        store.set(Namespace::Local, LOCKS_KEY, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn lock_and_unlock_are_idempotent() {
        let mut locks = LockSet::new();

        assert!(locks.lock(1));
        assert!(!locks.lock(1));
        assert!(locks.is_locked(1));
        assert_eq!(locks.len(), 1);

        assert!(locks.unlock(1));
        assert!(!locks.unlock(1));
        assert!(!locks.is_locked(1));
        assert!(locks.is_empty());
    }

    #[test]
    fn prune_removes_lock() {
        let mut locks = LockSet::new();
        locks.lock(1);

        assert!(locks.prune(1));
        assert!(!locks.prune(1));
        assert!(!locks.is_locked(1));
    }

    #[tokio::test]
    async fn persist_and_hydrate_roundtrip() {
        let store = MemoryStore::new();
        let mut locks = LockSet::new();
        locks.lock(3);
        locks.lock(1);

        locks.persist(&store).await.unwrap();

        // Stored form is a sorted list.
        let stored = store.get(Namespace::Local, LOCKS_KEY).await.unwrap().unwrap();
        assert_eq!(stored, json!([1, 3]));

        let hydrated = LockSet::hydrate(&store).await.unwrap();
        assert_eq!(hydrated, locks);
    }

    #[tokio::test]
    async fn hydrate_empty_store_yields_empty_set() {
        let store = MemoryStore::new();
        let locks = LockSet::hydrate(&store).await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn hydrate_discards_malformed_document() {
        let store = MemoryStore::new();
        store.seed(Namespace::Local, LOCKS_KEY, json!({"weird": true})).await;

        let locks = LockSet::hydrate(&store).await.unwrap();
        assert!(locks.is_empty());
    }
}
