//! TabWarden Engine - browser-tab lifecycle core.
//!
//! This crate provides the inactivity-tracking and close-decision engine of
//! TabWarden: it maintains per-tab activity timestamps, reconciles them
//! against wall-clock time across host restarts, decides whether a tab is
//! eligible for closure under a layered exclusion policy, and archives the
//! metadata of every tab it closes for later restoration.
//!
//! # Overview
//!
//! The engine consumes three host interfaces — a tab directory, a two-
//! namespace persistence store, and a wall clock — and is driven entirely
//! through one inbound event enum. A periodic sweep evaluates every open tab
//! against the configured inactivity threshold; activity signals (focus,
//! navigation, explicit resets) keep timers fresh independently of the
//! sweep. On startup a one-shot reconciliation pass repairs ledger staleness
//! accrued while the host process was suspended, under either the absolute
//! or the continue downtime policy.
//!
//! # Modules
//!
//! - [`settings`]: typed configuration backed by the synced namespace
//! - [`domains`]: domain exclusion matching (exact, subdomain, wildcards)
//! - [`ledger`]: per-tab last-activity timestamps
//! - [`locks`]: manual per-tab auto-close vetoes
//! - [`archive`]: bounded closed-tab archive
//! - [`engine`]: the close-decision state machine
//! - [`scheduler`]: sweep cadence derivation and the recurring wake-up
//! - [`runtime`]: event-loop wiring and the control handle
//! - [`host`]: host interface traits and in-memory implementations
//! - [`store`]: persistence store implementations
//! - [`error`]: error types for engine operations

pub mod archive;
pub mod domains;
pub mod engine;
pub mod error;
pub mod host;
pub mod ledger;
pub mod locks;
pub mod runtime;
pub mod scheduler;
pub mod settings;
pub mod store;

pub use archive::{ArchiveRecord, ARCHIVE_KEY, MAX_ARCHIVE_ENTRIES};
pub use engine::{AutoCloseEngine, DebugSnapshot, EngineEvent, EngineStats, EventOutcome};
pub use error::{EngineError, Result};
pub use host::{
    Clock, HostError, ManualClock, MemoryTabs, Namespace, StateStore, SystemClock, TabDirectory,
    TabId, TabInfo,
};
pub use ledger::{ActivityLedger, LEDGER_KEY};
pub use locks::{LockSet, LOCKS_KEY};
pub use runtime::{Handle, Runtime};
pub use settings::{DowntimePolicy, Settings, ThresholdUnit, SETTINGS_KEY};
pub use store::{FileStore, MemoryStore};
