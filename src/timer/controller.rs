use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::{broadcast, Mutex},
    task::{self, JoinHandle},
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    log_error, log_info,
    settings::{debug_mode, TrackerSettings},
};

use super::{
    events::{HostEvent, TrackerEvent},
    tracker::{TimerSnapshot, Tracker},
};

const ENABLE_LOGS: bool = true;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Async shell around the tracker: serializes host events and ticks through
/// one lock, autosaves the ledger and broadcasts notifications.
#[derive(Clone)]
pub struct TimerController {
    tracker: Arc<Mutex<Tracker>>,
    events: broadcast::Sender<TrackerEvent>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: CancellationToken,
}

impl TimerController {
    pub fn new(tracker: Tracker) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            events,
            ticker: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        self.tracker.lock().await.snapshot(Instant::now())
    }

    /// Applies one host event. Everything except plain activity is followed
    /// by a save when the ledger changed.
    pub async fn handle(&self, event: HostEvent) -> Result<TimerSnapshot> {
        let significant = !matches!(event, HostEvent::Activity);
        let mut guard = self.tracker.lock().await;
        let now = Instant::now();

        let result = guard
            .handle(event, now)
            .context("tracker rejected host event");
        if significant {
            persist(&mut guard, &self.events);
        }
        publish(&mut guard, &self.events);
        result?;

        Ok(guard.snapshot(now))
    }

    /// Hands new settings to the running tracker. A running ticker is
    /// restarted so a changed tick interval or autosave cadence applies.
    pub async fn apply_settings(&self, settings: TrackerSettings) {
        {
            let mut guard = self.tracker.lock().await;
            guard.apply_settings(settings);
            persist(&mut guard, &self.events);
            publish(&mut guard, &self.events);
        }

        let running = self.ticker.lock().await.is_some();
        if running && !self.shutdown.is_cancelled() {
            self.start().await;
        }
    }

    /// Starts the periodic tick task. Restarting replaces the previous task.
    pub async fn start(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let (tick_interval, autosave_every) = {
            let guard = self.tracker.lock().await;
            let settings = guard.settings();
            let autosave_every = if debug_mode() {
                1
            } else {
                settings.autosave_every_ticks.max(1)
            };
            (settings.tick_interval(), autosave_every)
        };

        let tracker = self.tracker.clone();
        let events = self.events.clone();
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u32 = 0;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let mut guard = tracker.lock().await;
                if let Err(err) = guard.tick(Instant::now()) {
                    log_error!("Tick failed: {err}");
                }

                ticks = ticks.wrapping_add(1);
                if ticks % autosave_every == 0 {
                    persist(&mut guard, &events);
                }
                publish(&mut guard, &events);
            }
        });

        *ticker_guard = Some(handle);
    }

    /// Stops ticking, closes the active document and writes the ledger.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(handle) = self.ticker.lock().await.take() {
            if let Err(err) = handle.await {
                log_error!("Ticker task ended abnormally: {err}");
            }
        }

        let mut guard = self.tracker.lock().await;
        guard
            .close(Instant::now())
            .context("closing active document on shutdown")?;
        publish(&mut guard, &self.events);
        off_worker(|| guard.save_ledger()).context("saving ledger on shutdown")?;
        log_info!("Tracker shut down");
        Ok(())
    }

    /// Read access for callers that need more than the snapshot.
    pub async fn inspect<R>(&self, f: impl FnOnce(&Tracker) -> R) -> R {
        f(&*self.tracker.lock().await)
    }
}

/// Saves when dirty. Failures leave the ledger dirty for the next attempt.
fn persist(tracker: &mut Tracker, events: &broadcast::Sender<TrackerEvent>) {
    if !tracker.ledger_dirty() {
        return;
    }
    if let Err(err) = off_worker(|| tracker.save_ledger()) {
        log_error!("Failed to save ledger: {err}");
        let _ = events.send(TrackerEvent::PersistFailed {
            message: err.to_string(),
        });
    }
}

/// Runs blocking ledger I/O so other tasks on this worker thread are moved
/// elsewhere. A current-thread runtime cannot do that, so it runs inline.
fn off_worker<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => task::block_in_place(f),
        _ => f(),
    }
}

fn publish(tracker: &mut Tracker, events: &broadcast::Sender<TrackerEvent>) {
    for event in tracker.drain_events() {
        // No subscribers is fine.
        let _ = events.send(event);
    }
}
