//! Host interfaces consumed by the engine.
//!
//! The engine never talks to a browser directly. Instead it is constructed
//! over three narrow host traits and drives them from a single event loop:
//!
//! - [`TabDirectory`]: enumerate open tabs, fetch one, destroy one.
//! - [`StateStore`]: durable key-value storage with two namespaces, a small
//!   synced one for settings and a larger device-local one for engine state.
//! - [`Clock`]: wall-clock time. The only durable time reference the host
//!   guarantees across suspensions is wall time, so everything is stamped in
//!   wall-clock milliseconds.
//!
//! [`MemoryTabs`] and [`ManualClock`] are in-process implementations used by
//! the simulation harness and the test suite; production embedders supply
//! their own.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Identifier for a tab, stable for the tab's lifetime in the host.
pub type TabId = i64;

/// Snapshot of an open tab as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    /// Host-assigned tab identifier.
    pub id: TabId,

    /// Current URL of the tab.
    pub url: String,

    /// Page title.
    #[serde(default)]
    pub title: String,

    /// Whether the user has pinned the tab.
    #[serde(default)]
    pub pinned: bool,

    /// Whether the tab is currently focused/foreground.
    #[serde(default)]
    pub active: bool,

    /// Identifier of the window containing the tab.
    #[serde(default)]
    pub window_id: i64,

    /// Favicon reference, if the host has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

/// Persistence namespaces offered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Small, cross-device storage. Used only for settings.
    Synced,
    /// Larger, device-local storage. Used for the activity ledger, the lock
    /// set, and the archive.
    Local,
}

/// Errors surfaced by host interface implementations.
#[derive(Error, Debug)]
pub enum HostError {
    /// The persistence store is unavailable or a read/write failed.
    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),

    /// The referenced tab no longer exists.
    #[error("tab {0} no longer exists")]
    TabGone(TabId),

    /// The tab directory failed in some other way.
    #[error("tab directory error: {0}")]
    Directory(String),
}

/// Enumerates and mutates the host's open tabs.
#[allow(async_fn_in_trait)]
pub trait TabDirectory {
    /// Lists all open tabs across all windows.
    async fn list_tabs(&self) -> Result<Vec<TabInfo>, HostError>;

    /// Fetches a single tab, or `None` if it no longer exists.
    async fn get_tab(&self, id: TabId) -> Result<Option<TabInfo>, HostError>;

    /// Destroys a tab. Fails with [`HostError::TabGone`] if the tab vanished
    /// before the call took effect.
    async fn destroy_tab(&self, id: TabId) -> Result<(), HostError>;
}

/// Durable key-value persistence with two independent namespaces.
#[allow(async_fn_in_trait)]
pub trait StateStore {
    /// Reads a value, or `None` if the key has never been written.
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, HostError>;

    /// Writes a value durably.
    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), HostError>;
}

/// Wall-clock time source.
///
/// All engine timestamps are wall-clock milliseconds so that state rehydrated
/// after a host suspension can be reconciled without an elapsed-time signal
/// from the OS.
pub trait Clock {
    /// Current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64 {
        self.now_utc().timestamp_millis()
    }
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced [`Clock`] for harnesses and tests.
///
/// Clones share the same underlying instant, so a harness can keep one handle
/// to advance time while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock positioned at the given wall-clock millisecond.
    #[must_use]
    pub fn at(ms: i64) -> Self {
        Self {
            ms: Arc::new(AtomicI64::new(ms)),
        }
    }

    /// Moves the clock to an absolute wall-clock millisecond.
    pub fn set(&self, ms: i64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance(&self, delta_ms: i64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.ms.load(Ordering::SeqCst))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    fn now_ms(&self) -> i64 {
        self.ms.load(Ordering::SeqCst)
    }
}

/// In-memory [`TabDirectory`] for the simulation harness and tests.
///
/// Clones share the same tab table. Destroy failures can be injected to
/// exercise the engine's destroy-after-archive error path.
#[derive(Debug, Clone, Default)]
pub struct MemoryTabs {
    tabs: Arc<RwLock<BTreeMap<TabId, TabInfo>>>,
    fail_destroys: Arc<AtomicBool>,
}

impl MemoryTabs {
    /// Creates an empty tab directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory pre-populated with the given tabs.
    #[must_use]
    pub fn with_tabs(tabs: impl IntoIterator<Item = TabInfo>) -> Self {
        let map = tabs.into_iter().map(|t| (t.id, t)).collect();
        Self {
            tabs: Arc::new(RwLock::new(map)),
            fail_destroys: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Adds or replaces a tab.
    pub async fn open(&self, tab: TabInfo) {
        self.tabs.write().await.insert(tab.id, tab);
    }

    /// Removes a tab without going through [`TabDirectory::destroy_tab`],
    /// as if the user closed it.
    pub async fn remove(&self, id: TabId) -> bool {
        self.tabs.write().await.remove(&id).is_some()
    }

    /// Marks a tab active and deactivates the other tabs in its window.
    pub async fn activate(&self, id: TabId) {
        let mut tabs = self.tabs.write().await;
        let window_id = match tabs.get(&id) {
            Some(tab) => tab.window_id,
            None => return,
        };
        for tab in tabs.values_mut() {
            if tab.window_id == window_id {
                tab.active = tab.id == id;
            }
        }
    }

    /// Updates a tab's URL, as after a completed navigation.
    pub async fn set_url(&self, id: TabId, url: impl Into<String>) {
        if let Some(tab) = self.tabs.write().await.get_mut(&id) {
            tab.url = url.into();
        }
    }

    /// Sets or clears a tab's pinned flag.
    pub async fn set_pinned(&self, id: TabId, pinned: bool) {
        if let Some(tab) = self.tabs.write().await.get_mut(&id) {
            tab.pinned = pinned;
        }
    }

    /// Makes subsequent [`TabDirectory::destroy_tab`] calls fail.
    pub fn set_destroy_failures(&self, fail: bool) {
        self.fail_destroys.store(fail, Ordering::SeqCst);
    }

    /// Number of open tabs.
    pub async fn len(&self) -> usize {
        self.tabs.read().await.len()
    }

    /// Returns `true` if no tabs are open.
    pub async fn is_empty(&self) -> bool {
        self.tabs.read().await.is_empty()
    }

    /// Returns `true` if the tab is still open.
    pub async fn contains(&self, id: TabId) -> bool {
        self.tabs.read().await.contains_key(&id)
    }
}

impl TabDirectory for MemoryTabs {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        Ok(self.tabs.read().await.values().cloned().collect())
    }

    async fn get_tab(&self, id: TabId) -> Result<Option<TabInfo>, HostError> {
        Ok(self.tabs.read().await.get(&id).cloned())
    }

    async fn destroy_tab(&self, id: TabId) -> Result<(), HostError> {
        if self.fail_destroys.load(Ordering::SeqCst) {
            return Err(HostError::Directory("injected destroy failure".to_string()));
        }
        let mut tabs = self.tabs.write().await;
        if tabs.remove(&id).is_some() {
            Ok(())
        } else {
            Err(HostError::TabGone(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: TabId, window_id: i64, active: bool) -> TabInfo {
        TabInfo {
            id,
            url: format!("https://example.com/{id}"),
            title: format!("Tab {id}"),
            pinned: false,
            active,
            window_id,
            favicon_url: None,
        }
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);

        clock.set(10_000);
        assert_eq!(clock.now_ms(), 10_000);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::at(0);
        let other = clock.clone();
        clock.advance(42);
        assert_eq!(other.now_ms(), 42);
    }

    #[test]
    fn manual_clock_utc_matches_ms() {
        let clock = ManualClock::at(1_700_000_000_000);
        assert_eq!(clock.now_utc().timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn memory_tabs_list_and_get() {
        let tabs = MemoryTabs::with_tabs([tab(1, 1, true), tab(2, 1, false)]);

        let listed = tabs.list_tabs().await.unwrap();
        assert_eq!(listed.len(), 2);

        let fetched = tabs.get_tab(2).await.unwrap();
        assert_eq!(fetched.unwrap().id, 2);

        assert!(tabs.get_tab(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_tabs_activate_deactivates_window_siblings() {
        let tabs = MemoryTabs::with_tabs([tab(1, 1, true), tab(2, 1, false), tab(3, 2, true)]);

        tabs.activate(2).await;

        let listed = tabs.list_tabs().await.unwrap();
        let by_id = |id| listed.iter().find(|t| t.id == id).unwrap();
        assert!(!by_id(1).active);
        assert!(by_id(2).active);
        // Other windows are untouched.
        assert!(by_id(3).active);
    }

    #[tokio::test]
    async fn memory_tabs_destroy_removes_tab() {
        let tabs = MemoryTabs::with_tabs([tab(1, 1, false)]);

        tabs.destroy_tab(1).await.unwrap();
        assert!(tabs.is_empty().await);

        let err = tabs.destroy_tab(1).await.unwrap_err();
        assert!(matches!(err, HostError::TabGone(1)));
    }

    #[tokio::test]
    async fn memory_tabs_destroy_failure_injection() {
        let tabs = MemoryTabs::with_tabs([tab(1, 1, false)]);
        tabs.set_destroy_failures(true);

        let err = tabs.destroy_tab(1).await.unwrap_err();
        assert!(matches!(err, HostError::Directory(_)));
        assert!(tabs.contains(1).await);

        tabs.set_destroy_failures(false);
        tabs.destroy_tab(1).await.unwrap();
    }

    #[test]
    fn tab_info_serializes_with_camel_case_fields() {
        let value = serde_json::to_value(tab(5, 2, false)).unwrap();
        assert_eq!(value["id"], 5);
        assert_eq!(value["windowId"], 2);
        assert!(value.get("window_id").is_none());
        assert!(value.get("faviconUrl").is_none());
    }
}
