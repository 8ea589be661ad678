use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::{
    classifier::ClassifierConfig,
    identity::ImportConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub tick_interval_ms: u64,
    /// Inactivity after the last signal before the timer pauses.
    pub debounce_secs: u64,
    /// How long an automatic idle decision can be undone.
    pub undo_window_secs: u64,
    /// How long an unanswered prompt stays open before its tentative
    /// decision is kept.
    pub prompt_timeout_secs: u64,
    /// Ledger autosave cadence while dirty.
    pub autosave_every_ticks: u32,
    pub idle_limit_min_secs: u64,
    pub idle_limit_max_secs: u64,
    /// Idle-limit adjustment per explicit prompt answer.
    pub idle_limit_step_secs: u64,
    pub stale_record_days: u32,
    pub classifier: ClassifierConfig,
    pub import: ImportConfig,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            debounce_secs: 60,
            undo_window_secs: 10,
            prompt_timeout_secs: 300,
            autosave_every_ticks: 30,
            idle_limit_min_secs: 15 * 60,
            idle_limit_max_secs: 25 * 60,
            idle_limit_step_secs: 60,
            stale_record_days: 365,
            classifier: ClassifierConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

impl TrackerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_secs(self.undo_window_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be positive");
        }
        if self.autosave_every_ticks == 0 {
            bail!("autosave_every_ticks must be positive");
        }
        if self.idle_limit_min_secs > self.idle_limit_max_secs {
            bail!(
                "idle limit bounds reversed: {} > {}",
                self.idle_limit_min_secs,
                self.idle_limit_max_secs
            );
        }
        self.classifier
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid classifier settings")?;
        self.import
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid import settings")?;
        Ok(())
    }
}

/// True when `WORKTIMER_DEBUG` asks for per-tick persistence.
pub fn debug_mode() -> bool {
    std::env::var("WORKTIMER_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    /// Loads settings from `path`, falling back to defaults when the file is
    /// missing. A file that parses but fails validation is an error.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<TrackerSettings>(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    log::warn!(
                        "Settings at {} unreadable ({err}); using defaults",
                        path.display()
                    );
                    TrackerSettings::default()
                }
            }
        } else {
            TrackerSettings::default()
        };
        data.validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracker(&self) -> TrackerSettings {
        self.read().clone()
    }

    pub fn update_tracker(&self, settings: TrackerSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerSettings> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
