use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};
use uuid::Uuid;

use crate::identity::Fingerprint;

/// Ledger-assigned handle for a record. Stays put when the record's identity
/// key is reassigned or upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdentityMode {
    Uuid,
    Fingerprint,
}

/// Canonical form of a host-supplied document UUID: lowercase hyphenated
/// when it parses (braced and simple forms included), trimmed otherwise.
pub fn normalize_uuid(raw: &str) -> String {
    let trimmed = raw.trim();
    match Uuid::parse_str(trimmed) {
        Ok(parsed) => parsed.hyphenated().to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: RecordId,
    pub identity_mode: IdentityMode,
    pub identity_key: String,
    pub accumulated_seconds: u64,
    #[serde(default)]
    pub fingerprint_snapshot: Option<Fingerprint>,
    #[serde(default)]
    pub last_path: Option<PathBuf>,
    #[serde(default)]
    pub import_seed_seconds: Option<u64>,
    pub last_accessed: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(identity_mode: IdentityMode, identity_key: String, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            identity_mode,
            identity_key,
            accumulated_seconds: 0,
            fingerprint_snapshot: None,
            last_path: None,
            import_seed_seconds: None,
            last_accessed: now,
        }
    }

    /// Value a reset returns the record to.
    pub fn reset_baseline(&self) -> u64 {
        match self.identity_mode {
            IdentityMode::Uuid => self.import_seed_seconds.unwrap_or(0),
            IdentityMode::Fingerprint => 0,
        }
    }
}
