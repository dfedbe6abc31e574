//! Per-tab activity ledger.
//!
//! Maps each observed tab to the wall-clock millisecond of its last
//! registered activity. The in-memory map is authoritative; persistence is
//! explicit and best-effort. Callers invoke [`ActivityLedger::persist`] after
//! mutating and log a failure without aborting — the ledger simply remains
//! unpersisted until the next successful write.
//!
//! The ledger is stored in the local namespace as a flat map of tab id to
//! timestamp under the `"tabActivity"` key.

use std::collections::HashMap;

use tracing::debug;

use crate::host::{HostError, Namespace, StateStore, TabId};

/// Storage key for the ledger in the local namespace.
pub const LEDGER_KEY: &str = "tabActivity";

/// Last-activity timestamps for all observed tabs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityLedger {
    entries: HashMap<TabId, i64>,
}

impl ActivityLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the ledger from durable storage.
    ///
    /// An absent document yields an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the store is unavailable; the caller decides
    /// whether to degrade to an empty ledger.
    pub async fn hydrate<S: StateStore>(store: &S) -> Result<Self, HostError> {
        let entries = match store.get(Namespace::Local, LEDGER_KEY).await? {
            Some(value) => match serde_json::from_value::<HashMap<TabId, i64>>(value) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(error = %e, "discarding malformed ledger document");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        debug!(tabs = entries.len(), "activity ledger hydrated");
        Ok(Self { entries })
    }

    /// Records activity for a tab at `now_ms`, returning the previous
    /// timestamp if the tab was already tracked.
    pub fn reset(&mut self, tab_id: TabId, now_ms: i64) -> Option<i64> {
        self.entries.insert(tab_id, now_ms)
    }

    /// Last-activity timestamp for a tab, if tracked.
    #[must_use]
    pub fn get(&self, tab_id: TabId) -> Option<i64> {
        self.entries.get(&tab_id).copied()
    }

    /// Drops a tab's entry, returning its timestamp if it was tracked.
    pub fn remove(&mut self, tab_id: TabId) -> Option<i64> {
        self.entries.remove(&tab_id)
    }

    /// Milliseconds since the tab's last activity, if tracked.
    #[must_use]
    pub fn time_since(&self, tab_id: TabId, now_ms: i64) -> Option<i64> {
        self.get(tab_id).map(|last| now_ms - last)
    }

    /// Number of tracked tabs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no tabs are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of all tracked tabs, in arbitrary order.
    #[must_use]
    pub fn tab_ids(&self) -> Vec<TabId> {
        self.entries.keys().copied().collect()
    }

    /// Writes the full ledger to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the write fails. The in-memory ledger is
    /// unaffected and remains authoritative.
    pub async fn persist<S: StateStore>(&self, store: &S) -> Result<(), HostError> {
        let value = serde_json::to_value(&self.entries)
            .map_err(|e| HostError::StoreUnavailable(e.to_string()))?;
        store.set(Namespace::Local, LEDGER_KEY, value).await
    }
}
