use std::path::PathBuf;
use thiserror::Error;

use crate::models::RecordId;

use super::DeltaId;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode ledger: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to replace {path} atomically: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to overwrite {path}: its unreadable contents could not be backed up")]
    StoreNotBackedUp {
        path: PathBuf,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("negative delta {0}s refused")]
    NegativeDelta(i64),

    #[error("unknown record {0}")]
    UnknownRecord(RecordId),

    #[error("unknown or already settled delta {0:?}")]
    UnknownDelta(DeltaId),

    #[error("undo window for delta {0:?} has closed")]
    DeltaExpired(DeltaId),

    #[error("record {0} has a document UUID; its identity cannot be reassigned")]
    ImmutableIdentity(RecordId),

    #[error("identity key {key} already belongs to record {existing}")]
    IdentityCollision { key: String, existing: RecordId },

    #[error("ledger invariant violated: {0}")]
    Invariant(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
