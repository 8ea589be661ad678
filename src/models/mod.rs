mod decision;
mod document;
mod record;

pub use decision::{DeltaTarget, PendingDecision, PendingSummary};
pub use document::{DocumentInfo, SaveInfo};
pub use record::{normalize_uuid, DocumentRecord, IdentityMode, RecordId};
