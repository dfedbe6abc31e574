//! Event loop wiring for the engine.
//!
//! [`Runtime`] owns the [`AutoCloseEngine`], the inbound event channel, and
//! the [`SweepScheduler`], and drives them from a single task — the crate's
//! one logical thread of control. Collaborators hold a cloneable [`Handle`]
//! and communicate exclusively by sending [`EngineEvent`]s; queries carry a
//! reply channel.
//!
//! Settings changes are applied atomically from the loop's perspective: the
//! engine merges the new document, and the loop reinstalls the sweep
//! schedule at the re-derived cadence before processing the next event, so
//! there is no dual firing and no gap beyond a single missed tick.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use crate::engine::{AutoCloseEngine, DebugSnapshot, EngineEvent, EngineStats, EventOutcome};
use crate::host::{Clock, StateStore, TabDirectory, TabId};
use crate::scheduler::SweepScheduler;

/// Capacity of the inbound event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Cloneable control surface for a running engine.
#[derive(Debug, Clone)]
pub struct Handle {
    events: mpsc::Sender<EngineEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Handle {
    /// Reports a tab gaining focus. Returns `false` if the runtime is gone.
    pub async fn tab_activated(&self, tab_id: TabId) -> bool {
        self.send(EngineEvent::TabActivated { tab_id }).await
    }

    /// Reports a tab update (navigation completion and/or activation).
    pub async fn tab_updated(&self, tab_id: TabId, load_complete: bool, became_active: bool) -> bool {
        self.send(EngineEvent::TabUpdated {
            tab_id,
            load_complete,
            became_active,
        })
        .await
    }

    /// Reports a tab removal.
    pub async fn tab_removed(&self, tab_id: TabId) -> bool {
        self.send(EngineEvent::TabRemoved { tab_id }).await
    }

    /// Requests an explicit timer reset for a tab.
    pub async fn reset_timer(&self, tab_id: TabId) -> bool {
        self.send(EngineEvent::ResetTimer { tab_id }).await
    }

    /// Locks a tab against auto-close.
    pub async fn lock_tab(&self, tab_id: TabId) -> bool {
        self.send(EngineEvent::LockTab { tab_id }).await
    }

    /// Unlocks a tab.
    pub async fn unlock_tab(&self, tab_id: TabId) -> bool {
        self.send(EngineEvent::UnlockTab { tab_id }).await
    }

    /// Delivers a changed settings document.
    pub async fn settings_changed(&self, value: Value) -> bool {
        self.send(EngineEvent::SettingsChanged { value }).await
    }

    /// Forces a sweep outside the regular cadence.
    pub async fn sweep_now(&self) -> bool {
        self.send(EngineEvent::SweepTick).await
    }

    /// Fetches a diagnostic snapshot for a tab.
    ///
    /// Returns `None` if the runtime has stopped.
    pub async fn debug_info(&self, tab_id: TabId) -> Option<DebugSnapshot> {
        let (reply, rx) = oneshot::channel();
        if !self.send(EngineEvent::DebugInfo { tab_id, reply }).await {
            return None;
        }
        rx.await.ok()
    }

    /// Fetches aggregate engine statistics.
    ///
    /// Returns `None` if the runtime has stopped.
    pub async fn stats(&self) -> Option<EngineStats> {
        let (reply, rx) = oneshot::channel();
        if !self.send(EngineEvent::Stats { reply }).await {
            return None;
        }
        rx.await.ok()
    }

    /// Asks the runtime to stop. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    async fn send(&self, event: EngineEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Owns the engine and its event loop.
pub struct Runtime<D, S, C> {
    engine: AutoCloseEngine<D, S, C>,
    events: mpsc::Receiver<EngineEvent>,
    scheduler: SweepScheduler,
    shutdown: watch::Receiver<bool>,
}

impl<D, S, C> Runtime<D, S, C>
where
    D: TabDirectory,
    S: StateStore,
    C: Clock,
{
    /// Boots the engine (including its reconciliation pass), installs the
    /// sweep schedule, and returns the runtime with a control handle.
    ///
    /// The returned runtime does nothing until [`Runtime::run`] is awaited.
    pub async fn start(directory: D, store: S, clock: C) -> (Self, Handle) {
        let engine = AutoCloseEngine::start(directory, store, clock).await;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut scheduler = SweepScheduler::new(events_tx.clone());
        scheduler.install(engine.check_interval());

        let runtime = Self {
            engine,
            events: events_rx,
            scheduler,
            shutdown: shutdown_rx,
        };
        let handle = Handle {
            events: events_tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (runtime, handle)
    }

    /// Runs the event loop until shutdown is requested or every handle is
    /// dropped. Returns the engine for post-run inspection.
    pub async fn run(mut self) -> AutoCloseEngine<D, S, C> {
        info!("engine runtime started");

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }

                maybe_event = self.events.recv() => {
                    let Some(event) = maybe_event else {
                        break;
                    };
                    if let EventOutcome::SettingsApplied {
                        check_interval,
                        debug_mode_changed,
                    } = self.engine.handle_event(event).await
                    {
                        self.scheduler.install(check_interval);
                        if debug_mode_changed {
                            info!(
                                debug_mode = self.engine.settings().debug_mode,
                                "propagating debug mode change"
                            );
                        }
                    }
                }
            }
        }

        self.scheduler.cancel();
        info!("engine runtime stopped");
        self.engine
    }
}
