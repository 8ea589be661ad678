use std::{
    mem,
    path::{Path, PathBuf},
    time::Instant,
};

use serde::Serialize;
use thiserror::Error;

use crate::{
    classifier::{AccuracyIndicator, IdleClassifier, Observation, Outcome},
    identity::{plan_save, probe_for, resolve, Resolution, SaveAction},
    ledger::{LedgerError, LedgerResult, TimeLedger},
    log_debug, log_info, log_warn,
    models::{DeltaTarget, DocumentInfo, PendingDecision, PendingSummary, RecordId, SaveInfo},
    settings::TrackerSettings,
    utils::format_work_time,
};

use super::{
    events::{FinalizeReason, HostEvent, TrackerEvent},
    state::{TimerState, TimerStatus},
};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no document is open")]
    NoDocument,
    #[error("no prompt is waiting for an answer")]
    NoPendingPrompt,
    #[error("no automatic decision to undo")]
    NothingToUndo,
    #[error("the undo window has closed")]
    UndoWindowClosed,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Where the active document's time goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Record(RecordId),
    /// Never saved; time accumulates in memory until the first save.
    Unsaved,
    /// Identity failed; time is shown for the session but never stored.
    Untracked,
}

#[derive(Debug)]
struct ActiveDocument {
    binding: Binding,
    path: Option<PathBuf>,
    session_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    pub seconds: u64,
    pub formatted: String,
    pub tracked: bool,
    pub accuracy: AccuracyIndicator,
    pub pending: Option<PendingSummary>,
}

/// Applies host signals to the timer, the ledger and the pending decision.
/// Every method is one atomic step; callers serialize access.
#[derive(Debug)]
pub struct Tracker {
    settings: TrackerSettings,
    classifier: IdleClassifier,
    ledger: TimeLedger,
    state: TimerState,
    document: Option<ActiveDocument>,
    pending: Option<PendingDecision>,
    outbox: Vec<TrackerEvent>,
}

impl Tracker {
    pub fn new(settings: TrackerSettings, mut ledger: TimeLedger) -> Self {
        ledger.adjust_idle_limit(0, settings.idle_limit_min_secs, settings.idle_limit_max_secs);
        Self {
            classifier: IdleClassifier::new(settings.classifier.clone()),
            state: TimerState::new(settings.debounce()),
            settings,
            ledger,
            document: None,
            pending: None,
            outbox: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &TimeLedger {
        &self.ledger
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn status(&self) -> TimerStatus {
        self.state.status
    }

    pub fn pending(&self) -> Option<&PendingDecision> {
        self.pending.as_ref()
    }

    /// Record the active document is bound to, if any.
    pub fn active_record(&self) -> Option<RecordId> {
        match self.document.as_ref()?.binding {
            Binding::Record(id) => Some(id),
            Binding::Unsaved | Binding::Untracked => None,
        }
    }

    pub fn displayed_seconds(&self) -> u64 {
        match &self.document {
            None => 0,
            Some(doc) => match doc.binding {
                Binding::Record(id) => self
                    .ledger
                    .record(id)
                    .map(|record| record.accumulated_seconds)
                    .unwrap_or(0),
                Binding::Unsaved | Binding::Untracked => doc.session_seconds,
            },
        }
    }

    pub fn snapshot(&self, now: Instant) -> TimerSnapshot {
        let seconds = self.displayed_seconds();
        TimerSnapshot {
            status: self.state.status,
            seconds,
            formatted: format_work_time(seconds),
            tracked: self.active_record().is_some(),
            accuracy: self.classifier.indicator(self.ledger.profile()),
            pending: self.pending.as_ref().map(|pending| pending.summary(now)),
        }
    }

    /// Events produced since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        mem::take(&mut self.outbox)
    }

    pub fn ledger_dirty(&self) -> bool {
        self.ledger.is_dirty()
    }

    pub fn save_ledger(&mut self) -> LedgerResult<()> {
        self.ledger.save()
    }

    pub fn cleanup_stale(&mut self) -> usize {
        self.ledger
            .cleanup_stale(self.settings.stale_record_days, chrono::Utc::now())
    }

    /// Swaps in new settings without interrupting the open document. A
    /// pending decision keeps the expiry it was created with.
    pub fn apply_settings(&mut self, settings: TrackerSettings) {
        if settings.classifier != *self.classifier.config() {
            self.ledger.retally_profile(&settings.classifier);
            self.classifier = IdleClassifier::new(settings.classifier.clone());
        }
        self.state.set_debounce(settings.debounce());
        let limit = self.ledger.adjust_idle_limit(
            0,
            settings.idle_limit_min_secs,
            settings.idle_limit_max_secs,
        );
        log_info!("settings applied; idle limit {limit}s");
        self.settings = settings;
    }

    pub fn handle(&mut self, event: HostEvent, now: Instant) -> Result<(), TrackerError> {
        match event {
            HostEvent::DocumentOpened(info) => self.open(info, now),
            HostEvent::Activity => self.activity(now),
            HostEvent::DocumentSaved(info) => self.save(info, now),
            HostEvent::DocumentClosed => self.close(now),
            HostEvent::PromptAnswered { accepted } => self.answer(accepted, now),
            HostEvent::UndoRequested => self.undo(now),
            HostEvent::ResetRequested => self.reset(now),
        }
    }

    pub fn open(&mut self, info: DocumentInfo, now: Instant) -> Result<(), TrackerError> {
        if self.document.is_some() {
            self.close(now)?;
        }

        let binding = if info.saved {
            let probe = probe_for(info.probe.as_ref(), info.path.as_deref());
            let resolution = resolve(
                &self.ledger,
                info.uuid.as_deref(),
                probe.as_ref(),
                info.path.as_deref(),
                info.editing_time_secs,
                &self.settings.import,
            );
            self.attach(resolution, info.path.as_deref())?
        } else {
            Binding::Unsaved
        };

        log_info!("document opened ({binding:?})");
        self.document = Some(ActiveDocument {
            binding,
            path: info.path,
            session_seconds: 0,
        });
        self.state.open(info.saved, now);
        self.emit_state();
        Ok(())
    }

    /// Applies a resolver verdict to the ledger.
    fn attach(
        &mut self,
        resolution: Resolution,
        path: Option<&Path>,
    ) -> Result<Binding, TrackerError> {
        let id = match resolution {
            Resolution::Existing(id) => id,
            Resolution::Create {
                mode,
                key,
                fingerprint,
                import_seed,
                ambiguous,
            } => {
                let id = if ambiguous {
                    self.ledger.create(mode, key)
                } else {
                    self.ledger.get_or_create(mode, &key).0
                };
                if let Some(fingerprint) = fingerprint {
                    self.ledger.set_snapshot(id, fingerprint)?;
                }
                if let Some(seed) = import_seed {
                    self.ledger.seed_import(id, seed)?;
                    log_info!("imported {seed}s of prior editing time into {id}");
                }
                id
            }
            Resolution::Untracked(reason) => {
                log_warn!("document identity unavailable, running untracked: {reason}");
                self.outbox.push(TrackerEvent::Untracked { reason });
                return Ok(Binding::Untracked);
            }
        };
        self.ledger.touch(id, path)?;
        Ok(Binding::Record(id))
    }

    pub fn tick(&mut self, now: Instant) -> Result<(), TrackerError> {
        if self.pending.as_ref().is_some_and(|p| p.is_expired(now)) {
            self.finalize_pending(FinalizeReason::Expired)?;
        }

        let advance = self.state.advance(now);
        self.credit(advance.credited_secs)?;
        if advance.paused {
            log_debug!("no activity for {:?}; paused", self.state.debounce());
            self.emit_state();
        }
        Ok(())
    }

    pub fn activity(&mut self, now: Instant) -> Result<(), TrackerError> {
        if self.document.is_none() {
            return Ok(());
        }
        let result = self.state.activity(now);
        self.credit(result.credited_secs)?;
        if let Some(gap) = result.idle_gap_secs {
            self.handle_gap(gap, now)?;
            self.emit_state();
        }
        Ok(())
    }

    fn credit(&mut self, seconds: u64) -> Result<(), TrackerError> {
        if seconds == 0 {
            return Ok(());
        }
        let Some(doc) = self.document.as_mut() else {
            return Ok(());
        };
        match doc.binding {
            Binding::Record(id) => {
                self.ledger.apply_delta(id, seconds as i64, None)?;
            }
            Binding::Unsaved | Binding::Untracked => doc.session_seconds += seconds,
        }
        Ok(())
    }

    fn handle_gap(&mut self, gap: u64, now: Instant) -> Result<(), TrackerError> {
        if self.pending.is_some() {
            self.finalize_pending(FinalizeReason::Superseded)?;
        }
        if gap == 0 {
            return Ok(());
        }

        let idle_limit = self.ledger.profile().idle_limit_secs();
        if gap > idle_limit {
            log_info!("idle gap of {gap}s exceeds limit {idle_limit}s; discarded");
            self.outbox.push(TrackerEvent::IdleDiscarded {
                idle_seconds: gap,
                idle_limit_secs: idle_limit,
            });
            return Ok(());
        }

        let assessment = self.classifier.assess(self.ledger.profile(), gap);
        let applied = assessment.tentative_outcome();
        let applied_delta = if applied.is_accept() { gap } else { 0 };
        let window = if assessment.decision.is_automatic() {
            self.settings.undo_window()
        } else {
            self.settings.prompt_timeout()
        };
        let expires_at = now + window;
        let target = self.apply_tentative(applied_delta, expires_at)?;

        log_debug!(
            "gap {gap}s in bucket {} (n={}, confidence {:.2}): {:?}",
            assessment.bucket,
            assessment.samples,
            assessment.confidence,
            assessment.decision
        );

        self.outbox.push(match assessment.decision.auto_outcome() {
            Some(outcome) => TrackerEvent::AutoDecided {
                accepted: outcome.is_accept(),
                seconds: gap,
                confidence: assessment.confidence,
                undo_window_secs: window.as_secs(),
            },
            None => TrackerEvent::PromptRequested {
                idle_seconds: gap,
                confidence: assessment.confidence,
                suggestion: assessment.suggestion,
                expires_in_secs: window.as_secs(),
            },
        });

        self.pending = Some(PendingDecision {
            idle_seconds: gap,
            decision: assessment.decision,
            confidence: assessment.confidence,
            suggestion: assessment.suggestion,
            applied,
            applied_delta,
            expires_at,
            target,
        });
        Ok(())
    }

    fn apply_tentative(
        &mut self,
        seconds: u64,
        reversible_until: Instant,
    ) -> Result<DeltaTarget, TrackerError> {
        let Some(doc) = self.document.as_mut() else {
            return Ok(DeltaTarget::Untracked);
        };
        Ok(match doc.binding {
            Binding::Record(id) => {
                let receipt = if seconds > 0 {
                    self.ledger
                        .apply_delta(id, seconds as i64, Some(reversible_until))?
                } else {
                    None
                };
                DeltaTarget::Record { id, receipt }
            }
            Binding::Unsaved => {
                doc.session_seconds += seconds;
                DeltaTarget::Session
            }
            Binding::Untracked => {
                doc.session_seconds += seconds;
                DeltaTarget::Untracked
            }
        })
    }

    /// Moves the pending decision's effect on the total from its applied
    /// outcome to `outcome`.
    fn reapply(
        &mut self,
        pending: &mut PendingDecision,
        outcome: Outcome,
        now: Instant,
    ) -> Result<(), TrackerError> {
        if pending.applied == outcome {
            return Ok(());
        }
        let gap = pending.idle_seconds;

        match (&mut pending.target, outcome) {
            (DeltaTarget::Record { receipt, .. }, Outcome::Discard) => {
                if let Some(receipt) = receipt.take() {
                    self.ledger.revert_delta(receipt, now)?;
                }
            }
            (DeltaTarget::Record { id, .. }, Outcome::Accept) => {
                self.ledger.apply_delta(*id, gap as i64, None)?;
            }
            (DeltaTarget::Session | DeltaTarget::Untracked, outcome) => {
                if let Some(doc) = self.document.as_mut() {
                    doc.session_seconds = match outcome {
                        Outcome::Accept => doc.session_seconds + gap,
                        Outcome::Discard => doc.session_seconds.saturating_sub(gap),
                    };
                }
            }
        }

        pending.applied = outcome;
        pending.applied_delta = if outcome.is_accept() { gap } else { 0 };
        Ok(())
    }

    /// Ends the pending decision without reversing it. Automatic decisions
    /// count as agreed with; unanswered prompts teach nothing.
    fn finalize_pending(&mut self, reason: FinalizeReason) -> Result<(), TrackerError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        if let DeltaTarget::Record {
            receipt: Some(receipt),
            ..
        } = pending.target
        {
            if let Err(err) = self.ledger.commit_delta(receipt) {
                log_warn!("committing idle delta: {err}");
            }
        }

        if let Some(outcome) = pending.decision.auto_outcome() {
            self.learn(pending.idle_seconds, outcome);
        }

        self.outbox.push(TrackerEvent::DecisionFinalized {
            idle_seconds: pending.idle_seconds,
            outcome: pending.applied,
            reason,
        });
        Ok(())
    }

    fn learn(&mut self, idle_seconds: u64, outcome: Outcome) {
        self.ledger.record_feedback(
            Observation {
                idle_seconds,
                outcome,
            },
            self.classifier.config(),
        );
    }

    /// Explicit answer to the open prompt.
    pub fn answer(&mut self, accepted: bool, now: Instant) -> Result<(), TrackerError> {
        let mut pending = match self.pending.take() {
            Some(pending) if pending.is_prompt() && !pending.is_expired(now) => pending,
            other => {
                self.pending = other;
                return Err(TrackerError::NoPendingPrompt);
            }
        };

        let outcome = Outcome::from_accepted(accepted);
        if let Err(err) = self.reapply(&mut pending, outcome, now) {
            self.pending = Some(pending);
            return Err(err);
        }
        if let DeltaTarget::Record {
            receipt: Some(receipt),
            ..
        } = pending.target
        {
            self.ledger.commit_delta(receipt)?;
        }

        self.learn(pending.idle_seconds, outcome);
        let step = self.settings.idle_limit_step_secs as i64;
        let limit = self.ledger.adjust_idle_limit(
            if accepted { step } else { -step },
            self.settings.idle_limit_min_secs,
            self.settings.idle_limit_max_secs,
        );
        log_info!(
            "gap of {}s answered {:?}; idle limit now {limit}s",
            pending.idle_seconds,
            outcome
        );

        self.outbox.push(TrackerEvent::DecisionFinalized {
            idle_seconds: pending.idle_seconds,
            outcome,
            reason: FinalizeReason::Answered,
        });
        self.emit_state();
        Ok(())
    }

    /// Reverses the pending automatic decision. Works once, inside the undo
    /// window.
    pub fn undo(&mut self, now: Instant) -> Result<(), TrackerError> {
        let mut pending = match self.pending.take() {
            Some(pending) if !pending.is_prompt() => pending,
            other => {
                self.pending = other;
                return Err(TrackerError::NothingToUndo);
            }
        };
        if pending.is_expired(now) {
            self.pending = Some(pending);
            self.finalize_pending(FinalizeReason::Expired)?;
            return Err(TrackerError::UndoWindowClosed);
        }

        let outcome = pending.applied.opposite();
        if let Err(err) = self.reapply(&mut pending, outcome, now) {
            self.pending = Some(pending);
            return Err(err);
        }
        self.learn(pending.idle_seconds, outcome);
        log_info!(
            "undid automatic decision on {}s gap; now {:?}",
            pending.idle_seconds,
            outcome
        );

        self.outbox.push(TrackerEvent::DecisionReverted {
            idle_seconds: pending.idle_seconds,
            outcome,
        });
        self.emit_state();
        Ok(())
    }

    pub fn save(&mut self, info: SaveInfo, now: Instant) -> Result<(), TrackerError> {
        let binding = self
            .document
            .as_ref()
            .map(|doc| doc.binding)
            .ok_or(TrackerError::NoDocument)?;

        let advance = self.state.advance(now);
        self.credit(advance.credited_secs)?;
        if let Some(path) = &info.path {
            if let Some(doc) = self.document.as_mut() {
                doc.path = Some(path.clone());
            }
        }
        let path = self.document.as_ref().and_then(|doc| doc.path.clone());

        match binding {
            Binding::Unsaved => {
                self.finalize_pending(FinalizeReason::Saved)?;
                let probe = probe_for(info.probe.as_ref(), path.as_deref());
                // The session produced any embedded editing time; no import.
                let resolution = resolve(
                    &self.ledger,
                    info.uuid.as_deref(),
                    probe.as_ref(),
                    path.as_deref(),
                    None,
                    &self.settings.import,
                );
                let binding = self.attach(resolution, path.as_deref())?;
                let doc = self.document.as_mut().ok_or(TrackerError::NoDocument)?;
                doc.binding = binding;
                if let Binding::Record(id) = binding {
                    let seconds = mem::take(&mut doc.session_seconds);
                    self.ledger.apply_delta(id, seconds as i64, None)?;
                    log_info!("first save moved {seconds}s into record {id}");
                }
                self.state.mark_saved();
            }
            Binding::Record(id) => {
                let record = self
                    .ledger
                    .record(id)
                    .ok_or(LedgerError::UnknownRecord(id))?;
                let probe = probe_for(info.probe.as_ref(), path.as_deref());
                match plan_save(record, info.uuid.as_deref(), probe.as_ref()) {
                    SaveAction::Unchanged => {}
                    SaveAction::Reassign(fingerprint) => {
                        match self.ledger.reassign_identity(id, fingerprint) {
                            Ok(()) => log_debug!("content changed; record {id} re-keyed"),
                            Err(LedgerError::IdentityCollision { key, existing }) => {
                                log_warn!(
                                    "new fingerprint {key} already belongs to {existing}; keeping old key"
                                );
                            }
                            Err(err) => return Err(err.into()),
                        }
                    }
                    SaveAction::Upgrade { uuid, fingerprint } => {
                        if let Some(fingerprint) = fingerprint {
                            self.ledger.set_snapshot(id, fingerprint)?;
                        }
                        let survivor = self.ledger.upgrade_identity(id, &uuid)?;
                        self.rebind(id, survivor);
                    }
                }
                let current = self.active_record().unwrap_or(id);
                self.ledger.touch(current, path.as_deref())?;
            }
            Binding::Untracked => {
                log_debug!("save of untracked document ignored");
            }
        }

        self.emit_state();
        Ok(())
    }

    /// Points the active document and any pending decision at `to` after a
    /// record merge.
    fn rebind(&mut self, from: RecordId, to: RecordId) {
        if from == to {
            return;
        }
        if let Some(doc) = self.document.as_mut() {
            if doc.binding == Binding::Record(from) {
                doc.binding = Binding::Record(to);
            }
        }
        if let Some(PendingDecision {
            target: DeltaTarget::Record { id, .. },
            ..
        }) = self.pending.as_mut()
        {
            if *id == from {
                *id = to;
            }
        }
    }

    pub fn close(&mut self, now: Instant) -> Result<(), TrackerError> {
        if self.document.is_none() {
            return Ok(());
        }
        self.finalize_pending(FinalizeReason::Closed)?;
        let credited = self.state.close(now);
        self.credit(credited)?;

        if let Some(doc) = self.document.take() {
            match doc.binding {
                Binding::Unsaved if doc.session_seconds > 0 => {
                    log_info!(
                        "closed without saving; discarded {}s",
                        doc.session_seconds
                    );
                }
                Binding::Record(id) => {
                    self.ledger.touch(id, None)?;
                }
                _ => {}
            }
        }
        self.emit_state();
        Ok(())
    }

    pub fn reset(&mut self, _now: Instant) -> Result<(), TrackerError> {
        let binding = self
            .document
            .as_ref()
            .map(|doc| doc.binding)
            .ok_or(TrackerError::NoDocument)?;
        self.finalize_pending(FinalizeReason::Reset)?;

        match binding {
            Binding::Record(id) => {
                let baseline = self.ledger.reset(id)?;
                log_info!("record {id} reset to {baseline}s");
            }
            Binding::Unsaved | Binding::Untracked => {
                if let Some(doc) = self.document.as_mut() {
                    doc.session_seconds = 0;
                }
            }
        }
        self.emit_state();
        Ok(())
    }

    fn emit_state(&mut self) {
        let event = TrackerEvent::StateChanged {
            status: self.state.status,
            seconds: self.displayed_seconds(),
        };
        self.outbox.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::{Decision, LearningProfile},
        identity::ImageProbe,
        models::IdentityMode,
    };
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Harness {
        _dir: TempDir,
        tracker: Tracker,
        t0: Instant,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let ledger = TimeLedger::new(dir.path().join("ledger.json"), LearningProfile::default());
            Self {
                tracker: Tracker::new(TrackerSettings::default(), ledger),
                _dir: dir,
                t0: Instant::now(),
            }
        }

        fn at(&self, secs: u64) -> Instant {
            self.t0 + Duration::from_secs(secs)
        }

        fn train(&mut self, idle_seconds: u64, outcome: Outcome, times: usize) {
            for _ in 0..times {
                self.tracker.learn(idle_seconds, outcome);
            }
        }

        fn history_len(&self) -> usize {
            self.tracker.ledger.profile().total_observations()
        }

        fn last_observation(&self) -> Option<Observation> {
            self.tracker.ledger.profile().history().last().copied()
        }

        /// Opens a UUID document at t0, lets the debounce run out, and ends a
        /// `gap`-second idle period at `60 + gap`.
        fn idle_gap(&mut self, gap: u64) {
            self.tracker.open(uuid_doc("doc"), self.t0).unwrap();
            self.tracker.tick(self.at(61)).unwrap();
            assert!(self.tracker.status().is_paused());
            self.tracker.activity(self.at(60 + gap)).unwrap();
        }
    }

    fn uuid_doc(uuid: &str) -> DocumentInfo {
        DocumentInfo {
            uuid: Some(uuid.into()),
            saved: true,
            ..DocumentInfo::default()
        }
    }

    fn probe(content: &[u8]) -> ImageProbe {
        ImageProbe::from_file_bytes(800, 600, content)
    }

    #[test]
    fn unsaved_time_moves_to_record_on_first_save() {
        let mut h = Harness::new();
        h.tracker
            .open(
                DocumentInfo {
                    saved: false,
                    ..DocumentInfo::default()
                },
                h.t0,
            )
            .unwrap();
        assert_eq!(h.tracker.status(), TimerStatus::TrackingUnsaved);
        h.tracker.activity(h.at(30)).unwrap();
        h.tracker.tick(h.at(50)).unwrap();
        assert_eq!(h.tracker.displayed_seconds(), 50);
        assert!(h.tracker.active_record().is_none());

        h.tracker
            .save(
                SaveInfo {
                    probe: Some(probe(b"first save")),
                    ..SaveInfo::default()
                },
                h.at(50),
            )
            .unwrap();

        let id = h.tracker.active_record().unwrap();
        let record = h.tracker.ledger().record(id).unwrap();
        assert_eq!(record.accumulated_seconds, 50);
        assert_eq!(record.identity_mode, IdentityMode::Fingerprint);
        assert_eq!(record.import_seed_seconds, None);
        assert_eq!(h.tracker.status(), TimerStatus::Tracking);
    }

    #[test]
    fn closing_unsaved_document_discards_its_time() {
        let mut h = Harness::new();
        h.tracker
            .open(
                DocumentInfo {
                    saved: false,
                    ..DocumentInfo::default()
                },
                h.t0,
            )
            .unwrap();
        h.tracker.tick(h.at(40)).unwrap();
        h.tracker.close(h.at(45)).unwrap();

        assert_eq!(h.tracker.ledger().records().count(), 0);
        assert_eq!(h.tracker.displayed_seconds(), 0);
        assert_eq!(h.tracker.status(), TimerStatus::NoDocument);
    }

    #[test]
    fn auto_accept_undoes_exactly_once() {
        let mut h = Harness::new();
        h.train(100, Outcome::Accept, 20);
        h.idle_gap(100);

        let pending = h.tracker.pending().unwrap();
        assert_eq!(pending.decision, Decision::AutoAccept);
        assert_eq!(h.tracker.displayed_seconds(), 160);

        h.tracker.undo(h.at(161)).unwrap();
        assert_eq!(h.tracker.displayed_seconds(), 60);
        assert!(h.tracker.pending().is_none());
        assert_eq!(
            h.last_observation().map(|o| o.outcome),
            Some(Outcome::Discard)
        );

        assert!(matches!(
            h.tracker.undo(h.at(162)),
            Err(TrackerError::NothingToUndo)
        ));
        assert_eq!(h.tracker.displayed_seconds(), 60);
        assert_eq!(h.history_len(), 21);
    }

    #[test]
    fn auto_discard_undo_restores_the_gap() {
        let mut h = Harness::new();
        h.train(100, Outcome::Discard, 20);
        h.idle_gap(100);
        assert_eq!(h.tracker.displayed_seconds(), 60);

        h.tracker.undo(h.at(165)).unwrap();
        assert_eq!(h.tracker.displayed_seconds(), 160);
        assert_eq!(
            h.last_observation().map(|o| o.outcome),
            Some(Outcome::Accept)
        );

        assert!(matches!(
            h.tracker.undo(h.at(166)),
            Err(TrackerError::NothingToUndo)
        ));
        assert_eq!(h.tracker.displayed_seconds(), 160);
        assert_eq!(h.history_len(), 21);
    }

    #[test]
    fn applied_settings_reach_the_running_tracker() {
        let mut h = Harness::new();
        h.train(100, Outcome::Accept, 20);

        let mut settings = h.tracker.settings().clone();
        settings.classifier.implicit_trust = false;
        settings.debounce_secs = 30;
        h.tracker.apply_settings(settings);

        h.tracker.open(uuid_doc("doc"), h.t0).unwrap();
        h.tracker.tick(h.at(31)).unwrap();
        assert!(h.tracker.status().is_paused());
        assert_eq!(h.tracker.displayed_seconds(), 30);

        h.tracker.activity(h.at(130)).unwrap();
        let pending = h.tracker.pending().unwrap();
        assert_eq!(pending.decision, Decision::Prompt);
        assert_eq!(pending.suggestion, Some(Outcome::Accept));
        assert_eq!(h.tracker.displayed_seconds(), 130);
    }

    #[test]
    fn new_bucket_bounds_recount_existing_history() {
        let mut h = Harness::new();
        h.train(100, Outcome::Accept, 3);
        h.train(200, Outcome::Accept, 3);

        let mut settings = h.tracker.settings().clone();
        settings.classifier.bucket_bounds_secs = vec![600];
        h.tracker.apply_settings(settings);

        let buckets: Vec<_> = h
            .tracker
            .ledger()
            .profile()
            .buckets()
            .map(|(key, counts)| (key.to_string(), counts.accept_count))
            .collect();
        assert_eq!(buckets, vec![("0-600".to_string(), 6)]);
        assert!(h.tracker.ledger_dirty());
    }

    #[test]
    fn expiry_without_undo_counts_as_agreement() {
        let mut h = Harness::new();
        h.train(100, Outcome::Accept, 20);
        h.idle_gap(100);

        h.tracker.tick(h.at(172)).unwrap();
        assert!(h.tracker.pending().is_none());
        assert_eq!(h.history_len(), 21);
        assert_eq!(
            h.last_observation().map(|o| o.outcome),
            Some(Outcome::Accept)
        );
        assert_eq!(h.tracker.displayed_seconds(), 172);
        assert!(matches!(
            h.tracker.undo(h.at(173)),
            Err(TrackerError::NothingToUndo)
        ));
    }

    #[test]
    fn undo_after_window_is_refused_and_kept() {
        let mut h = Harness::new();
        h.train(100, Outcome::Accept, 20);
        h.idle_gap(100);

        assert!(matches!(
            h.tracker.undo(h.at(171)),
            Err(TrackerError::UndoWindowClosed)
        ));
        assert_eq!(h.tracker.displayed_seconds(), 160);
        assert!(h.tracker.pending().is_none());
    }

    #[test]
    fn cold_start_prompt_answer_teaches_and_moves_idle_limit() {
        let mut h = Harness::new();
        h.idle_gap(100);

        let pending = h.tracker.pending().unwrap();
        assert!(pending.is_prompt());
        assert_eq!(pending.applied, Outcome::Discard);
        assert_eq!(h.tracker.displayed_seconds(), 60);
        assert!(h
            .tracker
            .drain_events()
            .iter()
            .any(|event| matches!(event, TrackerEvent::PromptRequested { .. })));

        h.tracker.answer(true, h.at(170)).unwrap();
        assert_eq!(h.tracker.displayed_seconds(), 160);
        assert_eq!(h.history_len(), 1);
        assert_eq!(h.tracker.ledger().profile().idle_limit_secs(), 1_260);
        assert!(matches!(
            h.tracker.answer(true, h.at(171)),
            Err(TrackerError::NoPendingPrompt)
        ));
    }

    #[test]
    fn declining_a_suggested_accept_reverts_it() {
        let mut h = Harness::new();
        // 9 of 12 accepts: medium confidence, suggestion accept.
        h.train(100, Outcome::Accept, 9);
        h.train(100, Outcome::Discard, 3);
        h.idle_gap(100);

        let pending = h.tracker.pending().unwrap();
        assert!(pending.is_prompt());
        assert_eq!(pending.applied, Outcome::Accept);
        assert_eq!(h.tracker.displayed_seconds(), 160);

        h.tracker.answer(false, h.at(165)).unwrap();
        assert_eq!(h.tracker.displayed_seconds(), 60);
        assert_eq!(h.tracker.ledger().profile().idle_limit_secs(), 1_140);
    }

    #[test]
    fn prompt_timeout_keeps_tentative_and_learns_nothing() {
        let mut h = Harness::new();
        h.idle_gap(100);
        h.tracker.tick(h.at(461)).unwrap();

        assert!(h.tracker.pending().is_none());
        assert_eq!(h.history_len(), 0);
        // 60s before the gap plus the next debounce window.
        assert_eq!(h.tracker.displayed_seconds(), 120);
    }

    #[test]
    fn gap_over_idle_limit_is_discarded_outright() {
        let mut h = Harness::new();
        h.idle_gap(1_300);

        assert!(h.tracker.pending().is_none());
        assert_eq!(h.tracker.displayed_seconds(), 60);
        assert_eq!(h.history_len(), 0);
        assert!(h.tracker.drain_events().iter().any(|event| matches!(
            event,
            TrackerEvent::IdleDiscarded {
                idle_seconds: 1_300,
                ..
            }
        )));
    }

    #[test]
    fn newer_gap_supersedes_open_prompt() {
        let mut h = Harness::new();
        h.idle_gap(100);
        h.tracker.tick(h.at(221)).unwrap();
        h.tracker.activity(h.at(260)).unwrap();

        assert_eq!(h.tracker.pending().unwrap().idle_seconds, 40);
        assert_eq!(h.history_len(), 0);
        assert!(h.tracker.drain_events().iter().any(|event| matches!(
            event,
            TrackerEvent::DecisionFinalized {
                idle_seconds: 100,
                reason: FinalizeReason::Superseded,
                ..
            }
        )));
    }

    #[test]
    fn reset_restores_import_seed_exactly() {
        let mut h = Harness::new();
        let seed = h
            .tracker
            .settings()
            .import
            .adjusted_seconds(Some(7_200))
            .unwrap();
        h.tracker
            .open(
                DocumentInfo {
                    editing_time_secs: Some(7_200),
                    ..uuid_doc("seeded")
                },
                h.t0,
            )
            .unwrap();
        assert_eq!(h.tracker.displayed_seconds(), seed);

        h.tracker.tick(h.at(30)).unwrap();
        assert_eq!(h.tracker.displayed_seconds(), seed + 30);
        h.tracker.reset(h.at(30)).unwrap();
        assert_eq!(h.tracker.displayed_seconds(), seed);

        // Reopening does not import again.
        h.tracker.close(h.at(30)).unwrap();
        h.tracker
            .open(
                DocumentInfo {
                    editing_time_secs: Some(9_000),
                    ..uuid_doc("seeded")
                },
                h.at(40),
            )
            .unwrap();
        assert_eq!(h.tracker.displayed_seconds(), seed);
    }

    #[test]
    fn missing_identity_runs_untracked() {
        let mut h = Harness::new();
        h.tracker
            .open(
                DocumentInfo {
                    saved: true,
                    ..DocumentInfo::default()
                },
                h.t0,
            )
            .unwrap();
        assert!(h
            .tracker
            .drain_events()
            .iter()
            .any(|event| matches!(event, TrackerEvent::Untracked { .. })));

        h.tracker.tick(h.at(20)).unwrap();
        assert_eq!(h.tracker.displayed_seconds(), 20);
        assert_eq!(h.tracker.ledger().records().count(), 0);
        assert!(!h.tracker.snapshot(h.at(20)).tracked);
    }

    #[test]
    fn save_with_new_uuid_merges_fingerprint_record() {
        let mut h = Harness::new();
        let (uuid_id, _) = h.tracker.ledger.get_or_create(IdentityMode::Uuid, "doc");
        h.tracker.ledger.apply_delta(uuid_id, 1_000, None).unwrap();

        let content = probe(b"exported canvas");
        h.tracker
            .open(
                DocumentInfo {
                    saved: true,
                    probe: Some(content.clone()),
                    ..DocumentInfo::default()
                },
                h.t0,
            )
            .unwrap();
        assert_ne!(h.tracker.active_record(), Some(uuid_id));
        h.tracker.tick(h.at(30)).unwrap();

        h.tracker
            .save(
                SaveInfo {
                    uuid: Some("doc".into()),
                    probe: Some(content),
                    ..SaveInfo::default()
                },
                h.at(30),
            )
            .unwrap();

        assert_eq!(h.tracker.active_record(), Some(uuid_id));
        assert_eq!(h.tracker.displayed_seconds(), 1_030);
        assert_eq!(h.tracker.ledger().records().count(), 1);
    }

    #[test]
    fn reopening_content_of_upgraded_document_keeps_its_total() {
        let mut h = Harness::new();
        let content = probe(b"flattened export");
        let fingerprint_doc = || DocumentInfo {
            saved: true,
            probe: Some(content.clone()),
            ..DocumentInfo::default()
        };

        h.tracker.open(fingerprint_doc(), h.t0).unwrap();
        h.tracker.tick(h.at(30)).unwrap();
        h.tracker
            .save(
                SaveInfo {
                    uuid: Some("doc".into()),
                    probe: Some(content.clone()),
                    ..SaveInfo::default()
                },
                h.at(30),
            )
            .unwrap();
        let upgraded = h.tracker.active_record().unwrap();
        h.tracker.close(h.at(30)).unwrap();

        for round in 1..=3u64 {
            let start = 100 * round;
            h.tracker.open(fingerprint_doc(), h.at(start)).unwrap();
            assert_ne!(h.tracker.active_record(), Some(upgraded));
            h.tracker.tick(h.at(start + 30)).unwrap();
            assert_eq!(h.tracker.displayed_seconds(), 30 * round);
            h.tracker.close(h.at(start + 30)).unwrap();
        }

        assert_eq!(h.tracker.ledger().records().count(), 2);
        assert_eq!(
            h.tracker.ledger().record(upgraded).unwrap().accumulated_seconds,
            30
        );
    }

    #[test]
    fn save_after_edit_rekeys_fingerprint_record() {
        let mut h = Harness::new();
        h.tracker
            .open(
                DocumentInfo {
                    saved: true,
                    probe: Some(probe(b"v1")),
                    ..DocumentInfo::default()
                },
                h.t0,
            )
            .unwrap();
        let id = h.tracker.active_record().unwrap();
        h.tracker.tick(h.at(40)).unwrap();

        let edited = probe(b"v2");
        h.tracker
            .save(
                SaveInfo {
                    probe: Some(edited.clone()),
                    ..SaveInfo::default()
                },
                h.at(40),
            )
            .unwrap();

        let record = h.tracker.ledger().record(id).unwrap();
        let fingerprint = crate::identity::Fingerprint::compute(&edited).unwrap();
        assert_eq!(record.identity_key, fingerprint.key());
        assert_eq!(record.accumulated_seconds, 40);
    }

    #[test]
    fn opening_another_document_closes_the_first() {
        let mut h = Harness::new();
        h.train(100, Outcome::Accept, 20);
        h.idle_gap(100);
        let first = h.tracker.active_record().unwrap();

        h.tracker.open(uuid_doc("other"), h.at(162)).unwrap();
        assert!(h.tracker.pending().is_none());
        assert_eq!(h.history_len(), 21);
        assert_ne!(h.tracker.active_record(), Some(first));
        assert_eq!(h.tracker.ledger().record(first).unwrap().accumulated_seconds, 162);
    }

    #[test]
    fn host_events_dispatch() {
        let mut h = Harness::new();
        h.tracker
            .handle(HostEvent::DocumentOpened(uuid_doc("doc")), h.t0)
            .unwrap();
        h.tracker.handle(HostEvent::Activity, h.at(5)).unwrap();
        assert!(matches!(
            h.tracker.handle(HostEvent::UndoRequested, h.at(6)),
            Err(TrackerError::NothingToUndo)
        ));
        h.tracker.handle(HostEvent::DocumentClosed, h.at(10)).unwrap();
        assert!(matches!(
            h.tracker.handle(HostEvent::ResetRequested, h.at(11)),
            Err(TrackerError::NoDocument)
        ));
    }
}
