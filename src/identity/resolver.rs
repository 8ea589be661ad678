use std::path::Path;

use crate::{
    ledger::TimeLedger,
    log_warn,
    models::{normalize_uuid, DocumentRecord, IdentityMode, RecordId},
};

use super::{
    fingerprint::{Fingerprint, FingerprintError, ImageProbe},
    import::ImportConfig,
};

const ENABLE_LOGS: bool = true;

/// What the tracker should do to attach an opened document to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// An existing record owns the document.
    Existing(RecordId),
    /// No usable record exists; create one.
    Create {
        mode: IdentityMode,
        key: String,
        fingerprint: Option<Fingerprint>,
        /// Import-adjusted starting seconds for a new UUID record.
        import_seed: Option<u64>,
        /// The fingerprint matched more than one candidate (or an upgraded
        /// record); the new record must not be merged with any of them.
        ambiguous: bool,
    },
    /// Identity could not be established; run without a record.
    Untracked(String),
}

/// Maps a document to a ledger record: embedded UUID first, content
/// fingerprint otherwise. Ambiguous fingerprint matches never reuse a record.
pub fn resolve(
    ledger: &TimeLedger,
    uuid: Option<&str>,
    probe: Option<&ImageProbe>,
    path: Option<&Path>,
    editing_time_secs: Option<u64>,
    import: &ImportConfig,
) -> Resolution {
    if let Some(uuid) = uuid.map(str::trim).filter(|uuid| !uuid.is_empty()) {
        let key = normalize_uuid(uuid);
        return match ledger.find(IdentityMode::Uuid, &key) {
            Some(id) => Resolution::Existing(id),
            None => Resolution::Create {
                mode: IdentityMode::Uuid,
                key,
                fingerprint: None,
                import_seed: import.adjusted_seconds(editing_time_secs),
                ambiguous: false,
            },
        };
    }

    let fingerprint = match fingerprint_of(probe) {
        Ok(fingerprint) => fingerprint,
        Err(err) => return Resolution::Untracked(err.to_string()),
    };
    let key = fingerprint.key();

    match match_fingerprint(ledger, &fingerprint, &key, path) {
        FingerprintMatch::One(id) => Resolution::Existing(id),
        FingerprintMatch::None => Resolution::Create {
            mode: IdentityMode::Fingerprint,
            key,
            fingerprint: Some(fingerprint),
            import_seed: None,
            ambiguous: false,
        },
        FingerprintMatch::Ambiguous(count) => {
            log_warn!("fingerprint {key} matches {count} records; tracking as a new document");
            Resolution::Create {
                mode: IdentityMode::Fingerprint,
                key,
                fingerprint: Some(fingerprint),
                import_seed: None,
                ambiguous: true,
            }
        }
    }
}

fn fingerprint_of(probe: Option<&ImageProbe>) -> Result<Fingerprint, FingerprintError> {
    match probe {
        Some(probe) => Fingerprint::compute(probe),
        None => Err(FingerprintError::MissingProbe),
    }
}

#[derive(Debug, PartialEq)]
enum FingerprintMatch {
    None,
    One(RecordId),
    Ambiguous(usize),
}

/// FINGERPRINT records keyed by `key` win outright. Only when there are none
/// do upgraded UUID records whose retained snapshot equals `fingerprint`
/// count, and any such hit is ambiguous. Duplicate keys (left by older
/// stores) are settled by `last_path` when exactly one of them was last seen
/// at `path`.
fn match_fingerprint(
    ledger: &TimeLedger,
    fingerprint: &Fingerprint,
    key: &str,
    path: Option<&Path>,
) -> FingerprintMatch {
    let keyed: Vec<&DocumentRecord> = ledger
        .records()
        .filter(|record| {
            record.identity_mode == IdentityMode::Fingerprint && record.identity_key == key
        })
        .collect();

    match keyed.as_slice() {
        [only] => FingerprintMatch::One(only.id),
        [] => {
            let snapshots = ledger
                .records()
                .filter(|record| {
                    record.identity_mode == IdentityMode::Uuid
                        && record.fingerprint_snapshot.as_ref() == Some(fingerprint)
                })
                .count();
            if snapshots == 0 {
                FingerprintMatch::None
            } else {
                FingerprintMatch::Ambiguous(snapshots)
            }
        }
        several => {
            let mut at_path = several
                .iter()
                .filter(|record| path.is_some() && record.last_path.as_deref() == path);
            match (at_path.next(), at_path.next()) {
                (Some(record), None) => FingerprintMatch::One(record.id),
                _ => FingerprintMatch::Ambiguous(several.len()),
            }
        }
    }
}

/// Identity maintenance needed after a tracked document is saved.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveAction {
    Unchanged,
    /// Content changed; re-key the FINGERPRINT record.
    Reassign(Fingerprint),
    /// The document now carries a UUID; move the record to UUID identity.
    Upgrade {
        uuid: String,
        fingerprint: Option<Fingerprint>,
    },
}

pub fn plan_save(
    record: &DocumentRecord,
    uuid: Option<&str>,
    probe: Option<&ImageProbe>,
) -> SaveAction {
    if record.identity_mode == IdentityMode::Uuid {
        return SaveAction::Unchanged;
    }

    let fingerprint = match fingerprint_of(probe) {
        Ok(fingerprint) => Some(fingerprint),
        Err(err) => {
            log_warn!("could not refresh fingerprint of record {}: {err}", record.id);
            None
        }
    };

    if let Some(uuid) = uuid.map(str::trim).filter(|uuid| !uuid.is_empty()) {
        return SaveAction::Upgrade {
            uuid: normalize_uuid(uuid),
            fingerprint,
        };
    }

    match fingerprint {
        Some(fingerprint) if fingerprint.key() != record.identity_key => {
            SaveAction::Reassign(fingerprint)
        }
        _ => SaveAction::Unchanged,
    }
}

/// Probe from the host, or one read from `path` when the host only supplied
/// dimensions.
pub fn probe_for(probe: Option<&ImageProbe>, path: Option<&Path>) -> Option<ImageProbe> {
    let probe = probe?;
    if !probe.sample.is_empty() {
        return Some(probe.clone());
    }
    let path = path?;
    match ImageProbe::read(path, probe.width, probe.height) {
        Ok(read) => Some(read),
        Err(err) => {
            log_warn!("{err}");
            None
        }
    }
}
