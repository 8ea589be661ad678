use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::identity::ImageProbe;

/// What the host knows about a document when it becomes active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    /// Identifier embedded in the document, if the format carries one.
    #[serde(default)]
    pub uuid: Option<String>,
    /// False for a document that has never been written to disk.
    pub saved: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub probe: Option<ImageProbe>,
    /// Total editing time recorded in the document's own metadata.
    #[serde(default)]
    pub editing_time_secs: Option<u64>,
}

/// What the host knows right after a document was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveInfo {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub probe: Option<ImageProbe>,
}
