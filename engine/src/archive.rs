//! Closed-tab archive.
//!
//! Every tab closed by the engine leaves behind an [`ArchiveRecord`] so the
//! (out-of-scope) restoration UI can bring it back. The archive is a bounded
//! FIFO stored newest-first in the local namespace under the `"savedTabs"`
//! key, capped at [`MAX_ARCHIVE_ENTRIES`]; records beyond the cap are
//! dropped from the tail.
//!
//! The archive is append/prune-only from the engine's perspective. Each
//! operation reads the stored list, mutates it, and writes it back — the
//! engine's single event loop means there is never a concurrent writer.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host::{HostError, Namespace, StateStore, TabInfo};

/// Storage key for the archive in the local namespace.
pub const ARCHIVE_KEY: &str = "savedTabs";

/// Maximum number of archive records retained.
pub const MAX_ARCHIVE_ENTRIES: usize = 1000;

/// Upper bound (exclusive) for the random id disambiguator.
const ID_DISAMBIGUATOR_RANGE: u32 = 1000;

/// Metadata for one tab closed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    /// Synthetic unique id: close time in milliseconds plus a random
    /// disambiguator, e.g. `tab_1700000000000_421`.
    pub id: String,

    /// URL the tab was showing when closed.
    pub url: String,

    /// Page title at close time.
    #[serde(default)]
    pub title: String,

    /// Favicon reference, if the host had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,

    /// Host window the tab belonged to.
    #[serde(default)]
    pub window_id: i64,

    /// Human-readable origin label embedding the close time and date.
    pub window_title: String,

    /// Close timestamp.
    pub closed_at: DateTime<Utc>,

    /// Day bucket for grouping in the restoration UI.
    pub date: String,
}

impl ArchiveRecord {
    /// Builds a record for a tab about to be closed at `closed_at`.
    #[must_use]
    pub fn for_tab(tab: &TabInfo, closed_at: DateTime<Utc>) -> Self {
        let disambiguator = rand::rng().random_range(0..ID_DISAMBIGUATOR_RANGE);
        Self {
            id: format!("tab_{}_{disambiguator}", closed_at.timestamp_millis()),
            url: tab.url.clone(),
            title: tab.title.clone(),
            favicon: tab.favicon_url.clone(),
            window_id: tab.window_id,
            window_title: format!(
                "Closed at {} on {}",
                closed_at.format("%H:%M:%S"),
                closed_at.format("%Y-%m-%d")
            ),
            closed_at,
            date: closed_at.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Reads the archive, newest first.
///
/// Individually malformed entries are skipped rather than failing the whole
/// read, so one corrupt record cannot wedge the archive.
///
/// # Errors
///
/// Returns [`HostError`] if the store is unavailable.
pub async fn list<S: StateStore>(store: &S) -> Result<Vec<ArchiveRecord>, HostError> {
    let records = match store.get(Namespace::Local, ARCHIVE_KEY).await? {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<ArchiveRecord>(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "skipping malformed archive record");
                    None
                }
            })
            .collect(),
        Some(_) => {
            debug!("archive document is not a list, treating as empty");
            Vec::new()
        }
        None => Vec::new(),
    };
    Ok(records)
}

/// Prepends a record and truncates the archive to [`MAX_ARCHIVE_ENTRIES`].
///
/// Returns the number of records evicted from the tail.
///
/// # Errors
///
/// Returns [`HostError`] if the read or the write fails. On failure nothing
/// has been persisted and the caller must abort the close.
pub async fn append<S: StateStore>(
    store: &S,
    record: ArchiveRecord,
) -> Result<usize, HostError> {
    let mut records = list(store).await?;
    records.insert(0, record);

    let evicted = records.len().saturating_sub(MAX_ARCHIVE_ENTRIES);
    records.truncate(MAX_ARCHIVE_ENTRIES);

    persist(store, &records).await?;
    if evicted > 0 {
        debug!(evicted, "archive cap reached, oldest records dropped");
    }
    Ok(evicted)
}

/// Removes a record by id.
///
/// Returns `true` if a record was removed. Used by the restoration surface
/// after a tab is restored or its record explicitly deleted.
///
/// # Errors
///
/// Returns [`HostError`] if the read or the write fails.
pub async fn remove<S: StateStore>(store: &S, id: &str) -> Result<bool, HostError> {
    let mut records = list(store).await?;
    let before = records.len();
    records.retain(|record| record.id != id);

    if records.len() == before {
        return Ok(false);
    }
    persist(store, &records).await?;
    Ok(true)
}

async fn persist<S: StateStore>(store: &S, records: &[ArchiveRecord]) -> Result<(), HostError> {
    let value = serde_json::to_value(records)
        .map_err(|e| HostError::StoreUnavailable(e.to_string()))?;
    store.set(Namespace::Local, ARCHIVE_KEY, value).await
}
