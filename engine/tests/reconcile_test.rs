//! Integration tests for the downtime reconciliation pass.
//!
//! Reconciliation runs exactly once at engine start, before any sweep, and
//! repairs ledger staleness accrued while the host process was down. These
//! tests seed a persisted ledger, boot the engine, and verify the two
//! downtime policies against it.

use serde_json::json;

use tabwarden_engine::archive;
use tabwarden_engine::engine::AutoCloseEngine;
use tabwarden_engine::host::{ManualClock, MemoryTabs, Namespace, StateStore, TabId, TabInfo};
use tabwarden_engine::ledger::LEDGER_KEY;
use tabwarden_engine::locks::LOCKS_KEY;
use tabwarden_engine::settings::SETTINGS_KEY;
use tabwarden_engine::store::MemoryStore;

// =============================================================================
// Test Helpers
// =============================================================================

/// Builds an inactive, unpinned tab.
fn tab(id: TabId, url: &str) -> TabInfo {
    TabInfo {
        id,
        url: url.to_string(),
        title: format!("Tab {id}"),
        pinned: false,
        active: false,
        window_id: 1,
        favicon_url: None,
    }
}

/// Seeds settings with a 10-second threshold and the given downtime policy.
async fn seed_settings(store: &MemoryStore, policy: &str) {
    store
        .seed(
            Namespace::Synced,
            SETTINGS_KEY,
            json!({
                "thresholdValue": 10,
                "thresholdUnit": "seconds",
                "downtimePolicy": policy
            }),
        )
        .await;
}

/// Seeds the persisted ledger document directly, as left by a previous run.
async fn seed_ledger(store: &MemoryStore, entries: &[(TabId, i64)]) {
    let map: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(id, ms)| (id.to_string(), json!(ms)))
        .collect();
    store
        .seed(Namespace::Local, LEDGER_KEY, serde_json::Value::Object(map))
        .await;
}

// =============================================================================
// Absolute Policy
// =============================================================================

/// A tab whose last activity was threshold+1s before process start is closed
/// during reconciliation, before any sweep runs.
#[tokio::test]
async fn absolute_policy_closes_expired_tab_at_startup() {
    let store = MemoryStore::new();
    seed_settings(&store, "absolute").await;
    // Last activity at t=0; the process comes back at t=11s.
    seed_ledger(&store, &[(1, 0)]).await;

    let tabs = MemoryTabs::with_tabs([tab(1, "https://example.com")]);
    let clock = ManualClock::at(11_000);

    let engine = AutoCloseEngine::start(tabs.clone(), store.clone(), clock).await;

    // Closed during startup, without any sweep tick.
    assert!(!tabs.contains(1).await);
    assert_eq!(engine.ledger().get(1), None);

    let records = archive::list(&store).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].closed_at.timestamp_millis(), 11_000);
}

/// A tab still inside its threshold at startup is left alone.
#[tokio::test]
async fn absolute_policy_keeps_unexpired_tab() {
    let store = MemoryStore::new();
    seed_settings(&store, "absolute").await;
    seed_ledger(&store, &[(1, 0)]).await;

    let tabs = MemoryTabs::with_tabs([tab(1, "https://example.com")]);
    let clock = ManualClock::at(9_000);

    let engine = AutoCloseEngine::start(tabs.clone(), store, clock).await;

    assert!(tabs.contains(1).await);
    assert_eq!(engine.ledger().get(1), Some(0));
}

/// Reconciliation honors the same exclusions as the sweep: active, pinned,
/// domain-excluded, and locked tabs all survive an overshot timer.
#[tokio::test]
async fn absolute_policy_honors_exclusions() {
    let store = MemoryStore::new();
    store
        .seed(
            Namespace::Synced,
            SETTINGS_KEY,
            json!({
                "thresholdValue": 10,
                "thresholdUnit": "seconds",
                "downtimePolicy": "absolute",
                "excludedDomains": ["kept.example.com"]
            }),
        )
        .await;
    seed_ledger(&store, &[(1, 0), (2, 0), (3, 0), (4, 0), (5, 0)]).await;
    store.seed(Namespace::Local, LOCKS_KEY, json!([4])).await;

    let mut active = tab(1, "https://example.com/active");
    active.active = true;
    let mut pinned = tab(2, "https://example.com/pinned");
    pinned.pinned = true;
    let excluded = tab(3, "https://kept.example.com/page");
    let locked = tab(4, "https://example.com/locked");
    let doomed = tab(5, "https://example.com/doomed");

    let tabs = MemoryTabs::with_tabs([active, pinned, excluded, locked, doomed]);
    let clock = ManualClock::at(1_000_000);

    AutoCloseEngine::start(tabs.clone(), store.clone(), clock).await;

    assert!(tabs.contains(1).await);
    assert!(tabs.contains(2).await);
    assert!(tabs.contains(3).await);
    assert!(tabs.contains(4).await);
    assert!(!tabs.contains(5).await);

    let records = archive::list(&store).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].url, "https://example.com/doomed");
}

/// Tabs with no ledger entry are untouched by reconciliation.
#[tokio::test]
async fn absolute_policy_ignores_untracked_tabs() {
    let store = MemoryStore::new();
    seed_settings(&store, "absolute").await;

    let tabs = MemoryTabs::with_tabs([tab(1, "https://example.com")]);
    let clock = ManualClock::at(1_000_000);

    let engine = AutoCloseEngine::start(tabs.clone(), store, clock).await;

    assert!(tabs.contains(1).await);
    assert_eq!(engine.ledger().get(1), None);
}

// =============================================================================
// Continue Policy
// =============================================================================

/// Under the continue policy an overshot tab survives startup and its timer
/// is re-armed to the reconciliation time, granting a full fresh threshold.
#[tokio::test]
async fn continue_policy_rearms_instead_of_closing() {
    let store = MemoryStore::new();
    seed_settings(&store, "continue").await;
    seed_ledger(&store, &[(1, 0)]).await;

    let tabs = MemoryTabs::with_tabs([tab(1, "https://example.com")]);
    let clock = ManualClock::at(11_000);

    let engine = AutoCloseEngine::start(tabs.clone(), store.clone(), clock).await;

    assert!(tabs.contains(1).await);
    assert_eq!(engine.ledger().get(1), Some(11_000));
    assert!(archive::list(&store).await.unwrap().is_empty());

    // The re-armed entry was persisted.
    let stored = store.get(Namespace::Local, LEDGER_KEY).await.unwrap().unwrap();
    assert_eq!(stored["1"], 11_000);
}

/// Entries still inside the threshold are not re-armed; the remaining time
/// keeps counting down from the original activity.
#[tokio::test]
async fn continue_policy_keeps_unexpired_entries() {
    let store = MemoryStore::new();
    seed_settings(&store, "continue").await;
    seed_ledger(&store, &[(1, 5_000)]).await;

    let tabs = MemoryTabs::with_tabs([tab(1, "https://example.com")]);
    let clock = ManualClock::at(9_000);

    let engine = AutoCloseEngine::start(tabs.clone(), store, clock).await;

    assert_eq!(engine.ledger().get(1), Some(5_000));
}

/// The continue policy never closes, even for tabs that would be eligible
/// under every exclusion rule.
#[tokio::test]
async fn continue_policy_never_closes_during_reconciliation() {
    let store = MemoryStore::new();
    seed_settings(&store, "continue").await;
    seed_ledger(&store, &[(1, 0), (2, 0)]).await;

    let tabs = MemoryTabs::with_tabs([
        tab(1, "https://example.com/a"),
        tab(2, "https://example.com/b"),
    ]);
    let clock = ManualClock::at(1_000_000_000);

    AutoCloseEngine::start(tabs.clone(), store.clone(), clock).await;

    assert_eq!(tabs.len().await, 2);
    assert!(archive::list(&store).await.unwrap().is_empty());
}
