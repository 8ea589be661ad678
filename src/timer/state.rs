use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    NoDocument,
    TrackingUnsaved,
    Tracking,
    Paused {
        saved: bool,
    },
}

impl TimerStatus {
    pub fn is_paused(&self) -> bool {
        matches!(self, TimerStatus::Paused { .. })
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, TimerStatus::NoDocument)
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, TimerStatus::Tracking | TimerStatus::Paused { saved: true })
    }

    fn tracking(saved: bool) -> Self {
        if saved {
            TimerStatus::Tracking
        } else {
            TimerStatus::TrackingUnsaved
        }
    }
}

/// Work seconds credited by one step, and whether the step ended in a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Advance {
    pub credited_secs: u64,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivityResult {
    pub credited_secs: u64,
    /// Length of the idle gap that this activity ended, debounce excluded.
    pub idle_gap_secs: Option<u64>,
}

/// Work/pause state of the active document. Time is credited from the clock,
/// not by counting ticks, so irregular or missed ticks neither gain nor lose
/// time; sub-second remainders carry over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub status: TimerStatus,
    #[serde(skip)]
    debounce: Duration,
    #[serde(skip)]
    last_activity: Option<Instant>,
    /// Instant up to which work time has been credited.
    #[serde(skip)]
    credited_until: Option<Instant>,
    #[serde(skip)]
    carry_ms: u64,
    #[serde(skip)]
    pause_started_at: Option<Instant>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl TimerState {
    pub fn new(debounce: Duration) -> Self {
        Self {
            status: TimerStatus::NoDocument,
            debounce,
            last_activity: None,
            credited_until: None,
            carry_ms: 0,
            pause_started_at: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Takes effect from the next credit; an existing pause is kept.
    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    pub fn pause_started_at(&self) -> Option<Instant> {
        self.pause_started_at
    }

    /// Starts tracking a freshly opened document. Opening counts as activity.
    pub fn open(&mut self, saved: bool, now: Instant) {
        *self = Self {
            status: TimerStatus::tracking(saved),
            debounce: self.debounce,
            last_activity: Some(now),
            credited_until: Some(now),
            carry_ms: 0,
            pause_started_at: None,
        };
    }

    /// Credits work time up to `now`, or up to the debounce deadline if that
    /// comes first, in which case the state pauses at the deadline.
    pub fn advance(&mut self, now: Instant) -> Advance {
        let (Some(last_activity), Some(credited_until)) = (self.last_activity, self.credited_until)
        else {
            return Advance::default();
        };
        if self.status.is_paused() || !self.status.is_open() {
            return Advance::default();
        }

        let deadline = last_activity + self.debounce;
        let until = now.min(deadline);
        let credited_secs = self.credit(credited_until, until);

        if now >= deadline {
            self.status = TimerStatus::Paused {
                saved: self.status.is_saved(),
            };
            self.pause_started_at = Some(deadline);
            Advance {
                credited_secs,
                paused: true,
            }
        } else {
            Advance {
                credited_secs,
                paused: false,
            }
        }
    }

    fn credit(&mut self, from: Instant, until: Instant) -> u64 {
        let elapsed_ms = until.saturating_duration_since(from).as_millis() as u64;
        self.credited_until = Some(until.max(from));
        self.carry_ms += elapsed_ms;
        let seconds = self.carry_ms / 1000;
        self.carry_ms %= 1000;
        seconds
    }

    /// Registers user activity. Ends an idle gap when paused; otherwise
    /// restarts the debounce window.
    pub fn activity(&mut self, now: Instant) -> ActivityResult {
        if !self.status.is_open() {
            return ActivityResult::default();
        }

        let Advance { credited_secs, .. } = self.advance(now);

        let idle_gap_secs = match self.status {
            TimerStatus::Paused { saved } => {
                let gap = self
                    .pause_started_at
                    .map(|started| now.saturating_duration_since(started).as_secs())
                    .unwrap_or(0);
                self.status = TimerStatus::tracking(saved);
                self.pause_started_at = None;
                // The sub-second carry survives the pause.
                self.credited_until = Some(now);
                Some(gap)
            }
            _ => None,
        };

        self.last_activity = Some(now);
        ActivityResult {
            credited_secs,
            idle_gap_secs,
        }
    }

    /// An unsaved document was written for the first time.
    pub fn mark_saved(&mut self) {
        self.status = match self.status {
            TimerStatus::TrackingUnsaved => TimerStatus::Tracking,
            TimerStatus::Paused { .. } => TimerStatus::Paused { saved: true },
            other => other,
        };
    }

    /// Credits any remaining work time and returns to `NoDocument`.
    pub fn close(&mut self, now: Instant) -> u64 {
        let Advance { credited_secs, .. } = self.advance(now);
        *self = Self::new(self.debounce);
        credited_secs
    }
}
