//! Inactivity tracking and close decisions.
//!
//! [`AutoCloseEngine`] is the state machine at the center of the crate. It
//! owns the [`Settings`], the [`ActivityLedger`], and the [`LockSet`], and is
//! driven entirely through [`AutoCloseEngine::handle_event`] — every inbound
//! signal (tab activity, control messages, settings changes, sweep ticks) is
//! one [`EngineEvent`] variant, so all state transitions are auditable in a
//! single dispatch function rather than scattered across listener
//! registrations.
//!
//! # Lifecycle
//!
//! [`AutoCloseEngine::start`] loads settings, hydrates the ledger and lock
//! set from durable storage, and runs the reconciliation pass exactly once —
//! before the first sweep — to repair ledger staleness accrued while the
//! process was down. After that the engine only reacts to events.
//!
//! # Failure posture
//!
//! Nothing here propagates an error to the end user. Transient host failures
//! are logged and retried on the next natural trigger (the next sweep tick
//! or activity event). The single hard failure is an archive write during a
//! close: a tab is never destroyed without a durable record, so that close
//! is aborted and retried on a later sweep.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveRecord};
use crate::domains;
use crate::error::EngineError;
use crate::host::{Clock, StateStore, TabDirectory, TabId, TabInfo};
use crate::ledger::ActivityLedger;
use crate::locks::LockSet;
use crate::scheduler;
use crate::settings::{DowntimePolicy, Settings};

/// Remaining-time window under which a tab is reported as closing soon.
const CLOSE_SOON_WINDOW_MS: i64 = 30_000;

/// Inbound events driving the engine.
///
/// Collaborators (the host's tab events, the popup, content scripts, the
/// sweep scheduler) all funnel through this enum.
#[derive(Debug)]
pub enum EngineEvent {
    /// A tab gained focus.
    TabActivated {
        /// The focused tab.
        tab_id: TabId,
    },

    /// A tab changed state.
    TabUpdated {
        /// The updated tab.
        tab_id: TabId,
        /// Whether a navigation just completed.
        load_complete: bool,
        /// Whether the update made the tab active.
        became_active: bool,
    },

    /// A tab was destroyed (by the user or by this engine).
    TabRemoved {
        /// The removed tab.
        tab_id: TabId,
    },

    /// Explicit timer reset requested by a collaborator.
    ResetTimer {
        /// The tab whose timer restarts.
        tab_id: TabId,
    },

    /// Veto auto-close for a tab.
    LockTab {
        /// The tab to lock.
        tab_id: TabId,
    },

    /// Lift the auto-close veto for a tab.
    UnlockTab {
        /// The tab to unlock.
        tab_id: TabId,
    },

    /// The synced settings document changed externally.
    SettingsChanged {
        /// The full new settings document.
        value: serde_json::Value,
    },

    /// Periodic sweep wake-up.
    SweepTick,

    /// Diagnostic snapshot request for one tab.
    DebugInfo {
        /// The tab to inspect.
        tab_id: TabId,
        /// Where to deliver the snapshot.
        reply: oneshot::Sender<DebugSnapshot>,
    },

    /// Engine statistics request.
    Stats {
        /// Where to deliver the statistics.
        reply: oneshot::Sender<EngineStats>,
    },
}

/// What the event loop should do after an event was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Nothing for the caller to act on.
    None,

    /// A sweep completed, closing the given number of tabs.
    Swept {
        /// Tabs closed by this sweep.
        closed: usize,
    },

    /// New settings took effect; the sweep cadence must be reinstalled.
    SettingsApplied {
        /// Cadence derived from the new threshold.
        check_interval: Duration,
        /// Whether the debug flag flipped, for propagation to observers.
        debug_mode_changed: bool,
    },
}

/// Point-in-time diagnostic view of one tab, for the debug surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    /// The inspected tab.
    pub tab_id: TabId,
    /// Last recorded activity, in wall-clock milliseconds.
    pub last_activity: Option<i64>,
    /// Milliseconds since last activity (0 when never observed).
    pub time_since_activity: i64,
    /// Configured threshold in milliseconds.
    pub threshold_ms: i64,
    /// Milliseconds until the tab becomes closeable. An active tab always
    /// shows the full threshold; its countdown only runs while inactive.
    pub time_remaining: i64,
    /// Whether the tab's domain matches an exclusion pattern.
    pub is_excluded: bool,
    /// Whether the tab is pinned.
    pub is_pinned: bool,
    /// Whether the tab is currently active.
    pub is_active: bool,
    /// Whether the tab is manually locked.
    pub is_locked: bool,
    /// Tab URL, if the tab still exists.
    pub url: Option<String>,
    /// Tab title, if the tab still exists.
    pub title: Option<String>,
    /// Settings in effect at snapshot time.
    pub settings: Settings,
}

/// Aggregate engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Tabs with a ledger entry.
    pub tracked_tabs: usize,
    /// Tabs currently locked.
    pub locked_tabs: usize,
    /// Configured exclusion patterns.
    pub excluded_domains: usize,
    /// Sweep ticks handled since start.
    pub check_count: u64,
    /// Seconds since the engine started.
    pub uptime_secs: i64,
}

/// The inactivity-tracking and close-decision engine.
///
/// Generic over the host interfaces so tests and the simulation harness can
/// drive it with in-memory implementations and a manual clock.
pub struct AutoCloseEngine<D, S, C> {
    directory: D,
    store: S,
    clock: C,
    settings: Settings,
    ledger: ActivityLedger,
    locks: LockSet,
    check_count: u64,
    started_ms: i64,
}

impl<D, S, C> AutoCloseEngine<D, S, C>
where
    D: TabDirectory,
    S: StateStore,
    C: Clock,
{
    /// Boots the engine: loads settings, hydrates durable state, and runs
    /// the one-shot reconciliation pass.
    ///
    /// Storage being unavailable is not fatal — settings fall back to
    /// defaults and the ledger and lock set start empty, exactly as on a
    /// first run.
    pub async fn start(directory: D, store: S, clock: C) -> Self {
        let settings = Settings::load(&store).await;

        let ledger = match ActivityLedger::hydrate(&store).await {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(error = %e, "ledger unavailable, starting empty");
                ActivityLedger::new()
            }
        };
        let locks = match LockSet::hydrate(&store).await {
            Ok(locks) => locks,
            Err(e) => {
                warn!(error = %e, "lock set unavailable, starting empty");
                LockSet::new()
            }
        };

        let started_ms = clock.now_ms();
        let mut engine = Self {
            directory,
            store,
            clock,
            settings,
            ledger,
            locks,
            check_count: 0,
            started_ms,
        };

        engine.reconcile().await;
        engine
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sweep cadence for the current threshold.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        scheduler::check_interval(self.settings.threshold_ms())
    }

    /// Dispatches one inbound event.
    ///
    /// This is the only mutation entry point; every transition of the state
    /// machine passes through here.
    pub async fn handle_event(&mut self, event: EngineEvent) -> EventOutcome {
        match event {
            EngineEvent::TabActivated { tab_id } => {
                debug!(tab_id, "tab activated, resetting timer");
                self.reset_timer(tab_id).await;
                EventOutcome::None
            }

            EngineEvent::TabUpdated {
                tab_id,
                load_complete,
                became_active,
            } => {
                if load_complete || became_active {
                    debug!(tab_id, load_complete, became_active, "tab updated, resetting timer");
                    self.reset_timer(tab_id).await;
                }
                EventOutcome::None
            }

            EngineEvent::TabRemoved { tab_id } => {
                self.forget_tab(tab_id).await;
                EventOutcome::None
            }

            EngineEvent::ResetTimer { tab_id } => {
                debug!(tab_id, "manual timer reset");
                self.reset_timer(tab_id).await;
                EventOutcome::None
            }

            EngineEvent::LockTab { tab_id } => {
                self.lock_tab(tab_id).await;
                EventOutcome::None
            }

            EngineEvent::UnlockTab { tab_id } => {
                self.unlock_tab(tab_id).await;
                EventOutcome::None
            }

            EngineEvent::SettingsChanged { value } => self.apply_settings(value),

            EngineEvent::SweepTick => EventOutcome::Swept {
                closed: self.sweep().await,
            },

            EngineEvent::DebugInfo { tab_id, reply } => {
                let snapshot = self.debug_snapshot(tab_id).await;
                let _ = reply.send(snapshot);
                EventOutcome::None
            }

            EngineEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
                EventOutcome::None
            }
        }
    }

    /// Records fresh activity for a tab and persists the ledger best-effort.
    pub async fn reset_timer(&mut self, tab_id: TabId) {
        let now = self.clock.now_ms();
        self.reset_timer_at(tab_id, now).await;
    }

    async fn reset_timer_at(&mut self, tab_id: TabId, now_ms: i64) {
        match self.ledger.reset(tab_id, now_ms) {
            Some(previous) => debug!(
                tab_id,
                inactive_ms = now_ms - previous,
                "timer reset"
            ),
            None => debug!(tab_id, "new tab timer started"),
        }
        self.persist_ledger().await;
    }

    /// Locks a tab against auto-close. Idempotent.
    pub async fn lock_tab(&mut self, tab_id: TabId) {
        if self.locks.lock(tab_id) {
            info!(tab_id, "tab locked");
            self.persist_locks().await;
        }
    }

    /// Unlocks a tab. Idempotent.
    pub async fn unlock_tab(&mut self, tab_id: TabId) {
        if self.locks.unlock(tab_id) {
            info!(tab_id, "tab unlocked");
            self.persist_locks().await;
        }
    }

    /// Returns `true` if the tab is locked.
    #[must_use]
    pub fn is_locked(&self, tab_id: TabId) -> bool {
        self.locks.is_locked(tab_id)
    }

    async fn forget_tab(&mut self, tab_id: TabId) {
        let tracked = self.ledger.remove(tab_id).is_some();
        if tracked {
            self.persist_ledger().await;
        }
        if self.locks.prune(tab_id) {
            debug!(tab_id, "pruned lock for removed tab");
            self.persist_locks().await;
        }
    }

    fn apply_settings(&mut self, value: serde_json::Value) -> EventOutcome {
        let old_debug = self.settings.debug_mode;
        self.settings = Settings::from_value(value);

        let debug_mode_changed = old_debug != self.settings.debug_mode;
        if debug_mode_changed {
            info!(debug_mode = self.settings.debug_mode, "debug mode toggled");
        }
        info!(
            threshold_ms = self.settings.threshold_ms(),
            enabled = self.settings.enabled,
            "settings applied"
        );

        EventOutcome::SettingsApplied {
            check_interval: self.check_interval(),
            debug_mode_changed,
        }
    }

    /// One-shot reconciliation of ledger staleness accrued during downtime.
    ///
    /// Runs before the first sweep. Under [`DowntimePolicy::Absolute`],
    /// overshot tabs are closed retroactively (subject to the same exclusion
    /// rules as the sweep). Under [`DowntimePolicy::Continue`], overshot
    /// timers are re-armed to a full fresh threshold and nothing is closed.
    pub async fn reconcile(&mut self) {
        let now = self.clock.now_ms();
        let threshold_ms = self.settings.threshold_ms();

        let tabs = match self.directory.list_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!(error = %e, "tab directory unavailable, skipping reconciliation");
                return;
            }
        };

        match self.settings.downtime_policy {
            DowntimePolicy::Absolute => {
                let mut closed = 0usize;
                for tab in &tabs {
                    let Some(elapsed) = self.ledger.time_since(tab.id, now) else {
                        continue;
                    };
                    let skip_pinned = tab.pinned && self.settings.exclude_pinned;
                    if elapsed > threshold_ms
                        && !tab.active
                        && !skip_pinned
                        && !domains::is_excluded(&tab.url, &self.settings.excluded_domains)
                        && !self.locks.is_locked(tab.id)
                    {
                        debug!(
                            tab_id = tab.id,
                            inactive_s = elapsed / 1000,
                            "closing tab that expired during downtime"
                        );
                        match self.close_tab(tab).await {
                            Ok(true) => closed += 1,
                            Ok(false) => {}
                            Err(e) => warn!(tab_id = tab.id, error = %e, "downtime close aborted"),
                        }
                    }
                }
                info!(closed, "reconciliation complete (absolute policy)");
            }

            DowntimePolicy::Continue => {
                let mut rearmed = 0usize;
                for tab in &tabs {
                    let Some(elapsed) = self.ledger.time_since(tab.id, now) else {
                        continue;
                    };
                    if elapsed > threshold_ms {
                        debug!(
                            tab_id = tab.id,
                            inactive_s = elapsed / 1000,
                            "re-arming timer after downtime"
                        );
                        self.ledger.reset(tab.id, now);
                        rearmed += 1;
                    }
                }
                if rearmed > 0 {
                    self.persist_ledger().await;
                }
                info!(rearmed, "reconciliation complete (continue policy)");
            }
        }
    }

    /// Evaluates every open tab and closes the ones past the threshold.
    ///
    /// Returns the number of tabs closed. A no-op while disabled.
    pub async fn sweep(&mut self) -> usize {
        if !self.settings.enabled {
            debug!("auto-close disabled, skipping sweep");
            return 0;
        }
        self.check_count += 1;

        let tabs = match self.directory.list_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!(error = %e, "tab directory unavailable, skipping sweep");
                return 0;
            }
        };

        let now = self.clock.now_ms();
        let threshold_ms = self.settings.threshold_ms();
        debug!(tabs = tabs.len(), threshold_ms, "sweep started");

        let mut closed = 0usize;
        for tab in &tabs {
            if self.should_close(tab, now, threshold_ms).await {
                match self.close_tab(tab).await {
                    Ok(true) => closed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(tab_id = tab.id, error = %e, "close aborted, will retry next sweep");
                    }
                }
            } else if let Some(elapsed) = self.ledger.time_since(tab.id, now) {
                let remaining = (threshold_ms - elapsed).max(0);
                if remaining > 0 && remaining < CLOSE_SOON_WINDOW_MS {
                    debug!(tab_id = tab.id, remaining_s = remaining / 1000, "tab closing soon");
                }
            }
        }

        if closed > 0 {
            info!(closed, "sweep complete");
        }
        closed
    }

    /// Decides whether a tab is closeable right now.
    ///
    /// Rules are evaluated strictly in order; the first matching rule
    /// decides:
    ///
    /// 1. locked → keep
    /// 2. pinned while pinned tabs are excluded → keep
    /// 3. domain excluded → keep
    /// 4. active → keep, and reset its timer (an active tab's countdown is
    ///    always held at full; this is how the engine avoids subscribing to
    ///    every possible still-active signal)
    /// 5. never observed → keep, and start its timer now
    /// 6. otherwise close iff the inactivity exceeds the threshold
    pub async fn should_close(&mut self, tab: &TabInfo, now_ms: i64, threshold_ms: i64) -> bool {
        if self.locks.is_locked(tab.id) {
            return false;
        }
        if tab.pinned && self.settings.exclude_pinned {
            return false;
        }
        if domains::is_excluded(&tab.url, &self.settings.excluded_domains) {
            return false;
        }
        if tab.active {
            self.reset_timer_at(tab.id, now_ms).await;
            return false;
        }
        let Some(last) = self.ledger.get(tab.id) else {
            self.reset_timer_at(tab.id, now_ms).await;
            return false;
        };

        now_ms - last > threshold_ms
    }

    /// Archives and destroys a tab.
    ///
    /// The archive record is written first; only after that write succeeds is
    /// destruction requested. Returns `Ok(true)` if the tab was destroyed,
    /// `Ok(false)` if it was archived but destruction failed (the ledger
    /// entry is kept so the tab stays tracked).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ArchiveWrite`] if the record could not be
    /// persisted; the tab is left untouched.
    pub async fn close_tab(&mut self, tab: &TabInfo) -> Result<bool, EngineError> {
        let closed_at = self.clock.now_utc();
        let record = ArchiveRecord::for_tab(tab, closed_at);

        archive::append(&self.store, record)
            .await
            .map_err(|source| EngineError::ArchiveWrite {
                tab_id: tab.id,
                source,
            })?;

        match self.directory.destroy_tab(tab.id).await {
            Ok(()) => {
                info!(tab_id = tab.id, url = %tab.url, "tab closed");
                self.ledger.remove(tab.id);
                self.persist_ledger().await;
                Ok(true)
            }
            Err(e) => {
                // The tab still exists; keep tracking it. The archive record
                // stays — restore-time dedupe handles the duplication risk.
                warn!(tab_id = tab.id, error = %e, "tab destruction failed, keeping ledger entry");
                Ok(false)
            }
        }
    }

    /// Builds a diagnostic snapshot of one tab.
    pub async fn debug_snapshot(&self, tab_id: TabId) -> DebugSnapshot {
        let tab = self.directory.get_tab(tab_id).await.ok().flatten();
        let now = self.clock.now_ms();
        let threshold_ms = self.settings.threshold_ms();

        let last_activity = self.ledger.get(tab_id);
        let is_active = tab.as_ref().is_some_and(|t| t.active);
        let time_since_activity = last_activity.map_or(0, |last| now - last);

        // An active tab shows the full threshold; the countdown only runs
        // while the tab is inactive.
        let time_remaining = if is_active {
            threshold_ms
        } else {
            match last_activity {
                Some(last) => (threshold_ms - (now - last)).max(0),
                None => threshold_ms,
            }
        };

        let snapshot = DebugSnapshot {
            tab_id,
            last_activity,
            time_since_activity,
            threshold_ms,
            time_remaining,
            is_excluded: tab
                .as_ref()
                .is_some_and(|t| domains::is_excluded(&t.url, &self.settings.excluded_domains)),
            is_pinned: tab.as_ref().is_some_and(|t| t.pinned),
            is_active,
            is_locked: self.locks.is_locked(tab_id),
            url: tab.as_ref().map(|t| t.url.clone()),
            title: tab.map(|t| t.title),
            settings: self.settings.clone(),
        };

        if self.settings.debug_mode {
            debug!(
                tab_id,
                remaining_s = snapshot.time_remaining / 1000,
                active = snapshot.is_active,
                "debug snapshot"
            );
        }
        snapshot
    }

    /// Aggregate statistics for the debug surface.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            tracked_tabs: self.ledger.len(),
            locked_tabs: self.locks.len(),
            excluded_domains: self.settings.excluded_domains.len(),
            check_count: self.check_count,
            uptime_secs: ((self.clock.now_ms() - self.started_ms) / 1000).max(0),
        }
    }

    /// Read access to the ledger, for diagnostics and tests.
    #[must_use]
    pub fn ledger(&self) -> &ActivityLedger {
        &self.ledger
    }

    async fn persist_ledger(&self) {
        if let Err(e) = self.ledger.persist(&self.store).await {
            warn!(error = %e, "failed to persist activity ledger");
        }
    }

    async fn persist_locks(&self) {
        if let Err(e) = self.locks.persist(&self.store).await {
            warn!(error = %e, "failed to persist lock set");
        }
    }
}
