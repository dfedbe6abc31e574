//! TabWarden - tab lifecycle engine harness.
//!
//! This binary drives the engine outside a browser host:
//!
//! - `tabwarden simulate`: run the full engine over a scripted timeline of
//!   tabs and activity events with a virtual clock, reporting every close
//!   decision and the resulting archive.
//! - `tabwarden inspect`: print the persisted engine state (settings,
//!   activity ledger, lock set, archive) from a state directory.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::BaseDirs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tabwarden_engine::engine::{AutoCloseEngine, EngineEvent, EventOutcome};
use tabwarden_engine::host::{
    Clock, ManualClock, MemoryTabs, Namespace, TabDirectory, TabId, TabInfo,
};
use tabwarden_engine::ledger::ActivityLedger;
use tabwarden_engine::locks::LockSet;
use tabwarden_engine::settings::{Settings, SETTINGS_KEY};
use tabwarden_engine::store::{FileStore, MemoryStore};
use tabwarden_engine::{archive, ledger};

/// Default state directory name relative to home.
const DEFAULT_STATE_DIR: &str = ".tabwarden";

/// TabWarden - tab lifecycle engine harness.
///
/// Runs the inactivity-tracking and close-decision engine against scripted
/// or persisted state, without a browser host attached.
#[derive(Parser, Debug)]
#[command(name = "tabwarden")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
EXAMPLES:
    # Replay a scripted timeline and report close decisions
    tabwarden simulate --scenario idle-tabs.json

    # Show what the engine has persisted
    tabwarden inspect
    tabwarden inspect --state-dir /tmp/tabwarden-state
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine over a scripted timeline.
    ///
    /// The scenario file describes the open tabs, an optional pre-seeded
    /// activity ledger, settings, and timed activity events. The engine runs
    /// with a virtual clock at its regular sweep cadence.
    Simulate {
        /// Path to the scenario JSON file.
        #[arg(short, long)]
        scenario: PathBuf,
    },

    /// Print persisted engine state from a state directory.
    Inspect {
        /// State directory (default: ~/.tabwarden).
        #[arg(short = 'd', long)]
        state_dir: Option<PathBuf>,
    },
}

/// A scripted engine run.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scenario {
    /// Settings document seeded into the synced namespace, if present.
    #[serde(default)]
    settings: serde_json::Value,

    /// Tabs open at the start of the run.
    tabs: Vec<TabInfo>,

    /// Pre-seeded activity ledger (tab id to last-activity ms), for
    /// exercising the downtime reconciliation path.
    #[serde(default)]
    ledger: HashMap<TabId, i64>,

    /// Timed events applied during the run.
    #[serde(default)]
    events: Vec<ScenarioEvent>,

    /// Virtual run length in milliseconds.
    duration_ms: i64,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioEvent {
    /// When the event fires, in virtual milliseconds from run start.
    at_ms: i64,

    #[serde(flatten)]
    action: ScenarioAction,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ScenarioAction {
    /// Focus a tab.
    Activate { tab_id: TabId },
    /// Complete a navigation in a tab.
    Navigate { tab_id: TabId, url: String },
    /// Close a tab by hand.
    Remove { tab_id: TabId },
    /// Explicit timer reset.
    ResetTimer { tab_id: TabId },
    /// Lock a tab against auto-close.
    Lock { tab_id: TabId },
    /// Unlock a tab.
    Unlock { tab_id: TabId },
    /// Replace the settings document.
    Settings { value: serde_json::Value },
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match cli.command {
        Command::Simulate { scenario } => runtime.block_on(run_simulate(scenario)),
        Command::Inspect { state_dir } => runtime.block_on(run_inspect(state_dir)),
    }
}

/// Runs the simulate command.
async fn run_simulate(path: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read scenario {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse scenario {}", path.display()))?;

    let store = MemoryStore::new();
    if scenario.settings.is_object() {
        store
            .seed(Namespace::Synced, SETTINGS_KEY, scenario.settings.clone())
            .await;
    }
    if !scenario.ledger.is_empty() {
        store
            .seed(
                Namespace::Local,
                ledger::LEDGER_KEY,
                serde_json::to_value(&scenario.ledger)?,
            )
            .await;
    }

    let tabs = MemoryTabs::with_tabs(scenario.tabs.clone());
    let clock = ManualClock::at(0);

    info!(
        tabs = scenario.tabs.len(),
        events = scenario.events.len(),
        duration_ms = scenario.duration_ms,
        "starting simulation"
    );

    // Engine start includes the reconciliation pass at t=0, which may
    // already close tabs when the scenario seeds a stale ledger.
    let mut engine = AutoCloseEngine::start(tabs.clone(), store.clone(), clock.clone()).await;

    let mut events = scenario.events;
    events.sort_by_key(|e| e.at_ms);
    let mut pending = events.into_iter().peekable();

    let mut total_closed = 0usize;
    loop {
        let interval_ms = engine.check_interval().as_millis() as i64;
        let sweep_at = clock.now_ms() + interval_ms;
        if sweep_at > scenario.duration_ms {
            break;
        }

        // Apply every scripted event due before this sweep, in order.
        while let Some(event) = pending.next_if(|e| e.at_ms <= sweep_at) {
            clock.set(event.at_ms);
            apply_action(&mut engine, &tabs, event.action).await;
        }

        clock.set(sweep_at);
        if let EventOutcome::Swept { closed } = engine.handle_event(EngineEvent::SweepTick).await {
            total_closed += closed;
        }
    }

    let archived = archive::list(&store).await?;
    let open = tabs.list_tabs().await?;
    let stats = engine.stats();

    println!();
    println!("Simulation finished at t={}ms", clock.now_ms());
    println!("  sweeps run:    {}", stats.check_count);
    println!("  tabs closed:   {total_closed}");
    println!("  tabs open:     {}", open.len());
    println!("  tabs tracked:  {}", stats.tracked_tabs);
    println!();

    if archived.is_empty() {
        println!("Archive is empty.");
    } else {
        println!("Archive ({} records, newest first):", archived.len());
        for record in &archived {
            println!(
                "  {} [{}] {} ({})",
                record.closed_at.format("%H:%M:%S"),
                record.id,
                record.title,
                record.url
            );
        }
    }

    Ok(())
}

/// Applies one scripted action to the host fakes and the engine.
async fn apply_action(
    engine: &mut AutoCloseEngine<MemoryTabs, MemoryStore, ManualClock>,
    tabs: &MemoryTabs,
    action: ScenarioAction,
) {
    match action {
        ScenarioAction::Activate { tab_id } => {
            tabs.activate(tab_id).await;
            engine
                .handle_event(EngineEvent::TabActivated { tab_id })
                .await;
        }
        ScenarioAction::Navigate { tab_id, url } => {
            tabs.set_url(tab_id, url).await;
            engine
                .handle_event(EngineEvent::TabUpdated {
                    tab_id,
                    load_complete: true,
                    became_active: false,
                })
                .await;
        }
        ScenarioAction::Remove { tab_id } => {
            tabs.remove(tab_id).await;
            engine
                .handle_event(EngineEvent::TabRemoved { tab_id })
                .await;
        }
        ScenarioAction::ResetTimer { tab_id } => {
            engine
                .handle_event(EngineEvent::ResetTimer { tab_id })
                .await;
        }
        ScenarioAction::Lock { tab_id } => {
            engine.handle_event(EngineEvent::LockTab { tab_id }).await;
        }
        ScenarioAction::Unlock { tab_id } => {
            engine.handle_event(EngineEvent::UnlockTab { tab_id }).await;
        }
        ScenarioAction::Settings { value } => {
            engine
                .handle_event(EngineEvent::SettingsChanged { value })
                .await;
        }
    }
}

/// Runs the inspect command.
async fn run_inspect(state_dir: Option<PathBuf>) -> Result<()> {
    let dir = match state_dir {
        Some(dir) => dir,
        None => default_state_dir()?,
    };
    let store = FileStore::open(&dir)
        .with_context(|| format!("Failed to open state directory {}", dir.display()))?;

    let settings = Settings::load(&store).await;
    let ledger = ActivityLedger::hydrate(&store).await.unwrap_or_default();
    let locks = LockSet::hydrate(&store).await.unwrap_or_default();
    let archived = archive::list(&store).await?;

    println!("State directory: {}", dir.display());
    println!();
    println!("Settings:");
    println!("  enabled:          {}", settings.enabled);
    println!("  threshold:        {}ms", settings.threshold_ms());
    println!("  excluded domains: {}", settings.excluded_domains.len());
    for pattern in &settings.excluded_domains {
        println!("    - {pattern}");
    }
    println!("  exclude pinned:   {}", settings.exclude_pinned);
    println!("  downtime policy:  {:?}", settings.downtime_policy);
    println!("  debug mode:       {}", settings.debug_mode);
    println!();
    println!("Tracked tabs: {}", ledger.len());
    println!("Locked tabs:  {}", locks.len());
    println!("Archive:      {} records", archived.len());
    for record in archived.iter().take(10) {
        println!(
            "  {} [{}] {} ({})",
            record.closed_at.format("%Y-%m-%d %H:%M:%S"),
            record.id,
            record.title,
            record.url
        );
    }
    if archived.len() > 10 {
        println!("  ... {} more", archived.len() - 10);
    }

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Gets the default state directory path.
fn default_state_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().context("Failed to determine home directory")?;
    Ok(base_dirs.home_dir().join(DEFAULT_STATE_DIR))
}
