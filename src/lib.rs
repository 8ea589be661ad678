pub mod classifier;
pub mod identity;
pub mod ledger;
pub mod models;
pub mod settings;
pub mod timer;
pub mod utils;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

pub use classifier::{IdleClassifier, Outcome};
pub use identity::{Fingerprint, ImageProbe, ImportConfig};
pub use ledger::{LedgerError, TimeLedger};
pub use settings::{SettingsStore, TrackerSettings};
pub use timer::{HostEvent, TimerController, TimerSnapshot, Tracker, TrackerEvent};

pub const LEDGER_FILE: &str = "work_time_ledger.json";
pub const SETTINGS_FILE: &str = "settings.json";

/// Loaded settings plus a running controller.
pub struct App {
    pub settings: SettingsStore,
    pub controller: TimerController,
}

impl App {
    /// Validates and stores new settings, then applies them to the tracker.
    pub async fn update_settings(&self, settings: TrackerSettings) -> Result<()> {
        self.settings.update_tracker(settings.clone())?;
        self.controller.apply_settings(settings).await;
        Ok(())
    }
}

/// One line of bridge input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeInput {
    Host(HostEvent),
    Settings { settings: TrackerSettings },
}

/// Reads `RUST_LOG`, defaulting to info. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Loads settings and the ledger from `data_dir` and starts ticking.
pub async fn bootstrap(data_dir: &Path) -> Result<App> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
    let tracker_settings = settings.tracker();

    let ledger_path = data_dir.join(LEDGER_FILE);
    let ledger = TimeLedger::load(&ledger_path, &tracker_settings.classifier);
    info!(
        "Loaded {} records and {} observations",
        ledger.records().count(),
        ledger.profile().total_observations()
    );

    let mut tracker = Tracker::new(tracker_settings, ledger);
    let removed = tracker.cleanup_stale();
    if removed > 0 {
        info!("Dropped {removed} stale records");
    }

    let controller = TimerController::new(tracker);
    controller.start().await;
    Ok(App {
        settings,
        controller,
    })
}

fn data_dir() -> PathBuf {
    std::env::var_os("WORKTIMER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".worktimer"))
}

/// Host bridge over stdio: one JSON `HostEvent` (or `{"settings": ...}`)
/// per input line, one JSON `TrackerEvent` per output line. Ends at EOF.
pub async fn serve_stdio(app: App) -> Result<()> {
    let mut events = app.controller.subscribe();
    let forward = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!("Failed to encode event: {err}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {skipped} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<BridgeInput>(&line) {
            Ok(BridgeInput::Host(event)) => app.controller.handle(event).await.map(|_| ()),
            Ok(BridgeInput::Settings { settings }) => app.update_settings(settings).await,
            Err(err) => {
                warn!("Ignoring malformed input: {err}");
                continue;
            }
        };
        if let Err(err) = outcome {
            warn!("{err:#}");
        }
    }

    app.controller.shutdown().await?;
    forward.abort();
    Ok(())
}

pub fn run() -> Result<()> {
    init_logging();
    info!("worktimer starting up...");

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async {
        let app = bootstrap(&data_dir()).await?;
        serve_stdio(app).await
    })
}
