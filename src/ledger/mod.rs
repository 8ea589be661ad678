mod error;
mod store_file;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    time::Instant,
};

use crate::{
    classifier::{ClassifierConfig, LearningProfile, Observation},
    identity::Fingerprint,
    log_error, log_info, log_warn,
    models::{normalize_uuid, DocumentRecord, IdentityMode, RecordId},
};

pub use error::{LedgerError, LedgerResult};
pub use store_file::STORE_VERSION;

use store_file::{backup_corrupt, read_store, write_store, StoreFile, StoreRead};

const ENABLE_LOGS: bool = true;

/// Receipt for a delta that can still be reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeltaId(u64);

#[derive(Debug, Clone, Copy)]
struct ReversibleDelta {
    record: RecordId,
    seconds: u64,
    reversible_until: Instant,
}

/// Durable store of per-document totals and the learning profile. The only
/// component that touches the store file.
#[derive(Debug)]
pub struct TimeLedger {
    path: PathBuf,
    records: BTreeMap<RecordId, DocumentRecord>,
    profile: LearningProfile,
    reversible: HashMap<DeltaId, ReversibleDelta>,
    next_delta: u64,
    dirty: bool,
    /// Set when an unusable store could not be copied aside. Saves refuse to
    /// replace it until a backup succeeds or the file is gone.
    guard_unbacked_store: bool,
}

impl TimeLedger {
    /// Empty ledger that will save to `path`.
    pub fn new(path: PathBuf, profile: LearningProfile) -> Self {
        Self {
            path,
            records: BTreeMap::new(),
            profile,
            reversible: HashMap::new(),
            next_delta: 0,
            dirty: false,
            guard_unbacked_store: false,
        }
    }

    /// Loads the store at `path`. A missing file gives an empty ledger; an
    /// unusable one is copied aside first, and if even that fails the ledger
    /// still starts empty but will not overwrite the file. The learning
    /// profile is repaired against `config` either way.
    pub fn load(path: &Path, config: &ClassifierConfig) -> Self {
        let mut ledger = match read_store(path) {
            StoreRead::Missing => {
                log_info!("no ledger at {}; starting empty", path.display());
                Self::new(path.to_path_buf(), LearningProfile::default())
            }
            StoreRead::Unusable { reason } => {
                let mut ledger = Self::new(path.to_path_buf(), LearningProfile::default());
                match backup_corrupt(path) {
                    Ok(backup) => log_warn!(
                        "ledger {} unusable ({reason}); copied to {} and starting empty",
                        path.display(),
                        backup.display()
                    ),
                    Err(err) => {
                        log_error!(
                            "ledger {} unusable ({reason}) and not backed up ({err}); starting empty without overwriting it",
                            path.display()
                        );
                        ledger.guard_unbacked_store = true;
                    }
                }
                ledger
            }
            StoreRead::Loaded(store) => {
                let mut ledger = Self::new(path.to_path_buf(), store.learning_profile);
                for record in store.records {
                    if ledger.records.insert(record.id, record).is_some() {
                        log_warn!("duplicate record id in ledger; keeping the later entry");
                    }
                }
                ledger
            }
        };

        if ledger.profile.repair(config) {
            ledger.dirty = true;
        }
        ledger
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the ledger atomically. On failure the previous file is intact
    /// and the ledger stays dirty.
    pub fn save(&mut self) -> LedgerResult<()> {
        if self.guard_unbacked_store {
            if self.path.exists() {
                backup_corrupt(&self.path).map_err(|err| LedgerError::StoreNotBackedUp {
                    path: self.path.clone(),
                    source: Box::new(err),
                })?;
            }
            self.guard_unbacked_store = false;
        }

        let store = StoreFile {
            version: STORE_VERSION,
            records: self.records.values().cloned().collect(),
            learning_profile: self.profile.clone(),
        };
        write_store(&self.path, &store)?;
        self.dirty = false;
        Ok(())
    }

    pub fn record(&self, id: RecordId) -> Option<&DocumentRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.records.values()
    }

    pub fn profile(&self) -> &LearningProfile {
        &self.profile
    }

    pub fn find(&self, mode: IdentityMode, key: &str) -> Option<RecordId> {
        self.records
            .values()
            .find(|record| record.identity_mode == mode && record.identity_key == key)
            .map(|record| record.id)
    }

    /// Returns the record for `(mode, key)`, creating it at zero if absent.
    /// UUID keys are normalized first.
    pub fn get_or_create(&mut self, mode: IdentityMode, key: &str) -> (RecordId, bool) {
        let key = match mode {
            IdentityMode::Uuid => normalize_uuid(key),
            IdentityMode::Fingerprint => key.to_string(),
        };
        if let Some(id) = self.find(mode, &key) {
            return (id, false);
        }
        let record = DocumentRecord::new(mode, key, Utc::now());
        let id = record.id;
        self.records.insert(id, record);
        self.dirty = true;
        (id, true)
    }

    /// Creates a record without checking for an existing key. Used when a
    /// match would be ambiguous.
    pub fn create(&mut self, mode: IdentityMode, key: String) -> RecordId {
        let record = DocumentRecord::new(mode, key, Utc::now());
        let id = record.id;
        self.records.insert(id, record);
        self.dirty = true;
        id
    }

    fn record_mut(&mut self, id: RecordId) -> LedgerResult<&mut DocumentRecord> {
        self.records
            .get_mut(&id)
            .ok_or(LedgerError::UnknownRecord(id))
    }

    /// Adds `seconds` to a record. With `reversible_until` the delta can be
    /// reverted until that instant through the returned receipt.
    pub fn apply_delta(
        &mut self,
        id: RecordId,
        seconds: i64,
        reversible_until: Option<Instant>,
    ) -> LedgerResult<Option<DeltaId>> {
        let seconds = u64::try_from(seconds).map_err(|_| LedgerError::NegativeDelta(seconds))?;
        let record = self.record_mut(id)?;
        record.accumulated_seconds = record.accumulated_seconds.saturating_add(seconds);
        self.dirty = true;

        Ok(reversible_until.map(|reversible_until| {
            let receipt = DeltaId(self.next_delta);
            self.next_delta += 1;
            self.reversible.insert(
                receipt,
                ReversibleDelta {
                    record: id,
                    seconds,
                    reversible_until,
                },
            );
            receipt
        }))
    }

    /// Takes a reversible delta back out. Works once per receipt and only
    /// before its window closes. Returns the seconds removed.
    pub fn revert_delta(&mut self, receipt: DeltaId, now: Instant) -> LedgerResult<u64> {
        let delta = *self
            .reversible
            .get(&receipt)
            .ok_or(LedgerError::UnknownDelta(receipt))?;

        if now > delta.reversible_until {
            self.reversible.remove(&receipt);
            return Err(LedgerError::DeltaExpired(receipt));
        }

        let record = self.record_mut(delta.record)?;
        let reverted = record
            .accumulated_seconds
            .checked_sub(delta.seconds)
            .ok_or_else(|| {
                LedgerError::Invariant(format!(
                    "reverting {}s from record {} holding {}s",
                    delta.seconds, delta.record, record.accumulated_seconds
                ))
            })?;
        record.accumulated_seconds = reverted;
        self.reversible.remove(&receipt);
        self.dirty = true;
        Ok(delta.seconds)
    }

    /// Makes a reversible delta permanent.
    pub fn commit_delta(&mut self, receipt: DeltaId) -> LedgerResult<()> {
        self.reversible
            .remove(&receipt)
            .map(|_| ())
            .ok_or(LedgerError::UnknownDelta(receipt))
    }

    /// Returns a record to its baseline: the import seed for UUID records
    /// that have one, zero otherwise. Outstanding reversible deltas on the
    /// record are dropped.
    pub fn reset(&mut self, id: RecordId) -> LedgerResult<u64> {
        let record = self.record_mut(id)?;
        let baseline = record.reset_baseline();
        record.accumulated_seconds = baseline;
        self.reversible.retain(|_, delta| delta.record != id);
        self.dirty = true;
        Ok(baseline)
    }

    /// Re-keys a FINGERPRINT record after its content changed. Time is kept.
    pub fn reassign_identity(&mut self, id: RecordId, fingerprint: Fingerprint) -> LedgerResult<()> {
        let key = fingerprint.key();
        if let Some(existing) = self.find(IdentityMode::Fingerprint, &key) {
            if existing != id {
                return Err(LedgerError::IdentityCollision { key, existing });
            }
        }

        let record = self.record_mut(id)?;
        if record.identity_mode == IdentityMode::Uuid {
            return Err(LedgerError::ImmutableIdentity(id));
        }
        record.identity_key = key;
        record.fingerprint_snapshot = Some(fingerprint);
        self.dirty = true;
        Ok(())
    }

    /// Moves a FINGERPRINT record to UUID identity once its document carries
    /// an embedded UUID. If a record with that UUID already exists the two are
    /// merged into it and its id is returned.
    pub fn upgrade_identity(&mut self, id: RecordId, uuid: &str) -> LedgerResult<RecordId> {
        let key = normalize_uuid(uuid);
        let record = self.record(id).ok_or(LedgerError::UnknownRecord(id))?;
        match record.identity_mode {
            IdentityMode::Uuid if record.identity_key == key => return Ok(id),
            IdentityMode::Uuid => return Err(LedgerError::ImmutableIdentity(id)),
            IdentityMode::Fingerprint => {}
        }

        let Some(target) = self.find(IdentityMode::Uuid, &key) else {
            let record = self.record_mut(id)?;
            record.identity_mode = IdentityMode::Uuid;
            record.identity_key = key;
            self.dirty = true;
            return Ok(id);
        };

        let merged = self
            .records
            .remove(&id)
            .ok_or(LedgerError::UnknownRecord(id))?;
        let survivor = self.record_mut(target)?;
        survivor.accumulated_seconds = survivor
            .accumulated_seconds
            .saturating_add(merged.accumulated_seconds);
        if merged.fingerprint_snapshot.is_some() {
            survivor.fingerprint_snapshot = merged.fingerprint_snapshot;
        }
        if merged.last_path.is_some() {
            survivor.last_path = merged.last_path;
        }
        survivor.last_accessed = survivor.last_accessed.max(merged.last_accessed);

        for delta in self.reversible.values_mut() {
            if delta.record == id {
                delta.record = target;
            }
        }
        self.dirty = true;
        log_info!(
            "merged record {id} ({}s) into {target} for uuid {key}",
            merged.accumulated_seconds
        );
        Ok(target)
    }

    /// Records the import-adjusted starting time once. Returns false if the
    /// record was already seeded.
    pub fn seed_import(&mut self, id: RecordId, seconds: u64) -> LedgerResult<bool> {
        let record = self.record_mut(id)?;
        if record.import_seed_seconds.is_some() {
            return Ok(false);
        }
        record.import_seed_seconds = Some(seconds);
        record.accumulated_seconds = record.accumulated_seconds.saturating_add(seconds);
        self.dirty = true;
        Ok(true)
    }

    pub fn set_snapshot(&mut self, id: RecordId, fingerprint: Fingerprint) -> LedgerResult<()> {
        let record = self.record_mut(id)?;
        if record.fingerprint_snapshot.as_ref() != Some(&fingerprint) {
            record.fingerprint_snapshot = Some(fingerprint);
            self.dirty = true;
        }
        Ok(())
    }

    /// Marks a record as accessed now, updating its path hint when given.
    pub fn touch(&mut self, id: RecordId, path: Option<&Path>) -> LedgerResult<()> {
        let record = self.record_mut(id)?;
        record.last_accessed = Utc::now();
        if let Some(path) = path {
            record.last_path = Some(path.to_path_buf());
        }
        self.dirty = true;
        Ok(())
    }

    /// Drops records not accessed for `max_age_days`. Records with an
    /// outstanding reversible delta are kept.
    pub fn cleanup_stale(&mut self, max_age_days: u32, now: DateTime<Utc>) -> usize {
        let cutoff = now - ChronoDuration::days(i64::from(max_age_days));
        let busy: Vec<RecordId> = self.reversible.values().map(|delta| delta.record).collect();
        let before = self.records.len();
        self.records
            .retain(|id, record| record.last_accessed >= cutoff || busy.contains(id));
        let removed = before - self.records.len();
        if removed > 0 {
            log_info!("removed {removed} records idle for over {max_age_days} days");
            self.dirty = true;
        }
        removed
    }

    /// Appends one feedback observation to the learning profile.
    pub fn record_feedback(&mut self, observation: Observation, config: &ClassifierConfig) {
        self.profile.record(observation, config);
        self.dirty = true;
    }

    /// Recounts the profile under `config`, e.g. after the buckets changed.
    pub fn retally_profile(&mut self, config: &ClassifierConfig) -> bool {
        let changed = self.profile.repair(config);
        if changed {
            self.dirty = true;
        }
        changed
    }

    pub fn adjust_idle_limit(&mut self, delta_secs: i64, min: u64, max: u64) -> u64 {
        let before = self.profile.idle_limit_secs();
        let after = self.profile.adjust_idle_limit(delta_secs, min, max);
        if before != after {
            self.dirty = true;
        }
        after
    }
}
