use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::{classifier::LearningProfile, models::DocumentRecord};

use super::error::{LedgerError, LedgerResult};

pub const STORE_VERSION: u32 = 1;

/// On-disk layout of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    pub version: u32,
    #[serde(default)]
    pub records: Vec<DocumentRecord>,
    #[serde(default)]
    pub learning_profile: LearningProfile,
}

/// Outcome of reading the store from disk.
#[derive(Debug)]
pub enum StoreRead {
    Missing,
    Loaded(StoreFile),
    /// Present but unusable; `reason` says why.
    Unusable { reason: String },
}

pub fn read_store(path: &Path) -> StoreRead {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return StoreRead::Missing,
        Err(err) => {
            return StoreRead::Unusable {
                reason: format!("read failed: {err}"),
            }
        }
    };

    if contents.trim().is_empty() {
        return StoreRead::Unusable {
            reason: "file is empty".into(),
        };
    }

    match serde_json::from_str::<StoreFile>(&contents) {
        Ok(store) if store.version == STORE_VERSION => StoreRead::Loaded(store),
        Ok(store) => StoreRead::Unusable {
            reason: format!(
                "unsupported version {} (expected {STORE_VERSION})",
                store.version
            ),
        },
        Err(err) => StoreRead::Unusable {
            reason: format!("parse failed: {err}"),
        },
    }
}

/// Copies an unusable store aside as `<name>.corrupt-<timestamp>` and returns
/// the backup path.
pub fn backup_corrupt(path: &Path) -> LedgerResult<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger.json".into());
    let backup = path.with_file_name(format!("{file_name}.corrupt-{stamp}"));

    fs::copy(path, &backup).map_err(|source| LedgerError::Io {
        path: backup.clone(),
        source,
    })?;
    Ok(backup)
}

pub fn write_store(path: &Path, store: &StoreFile) -> LedgerResult<()> {
    let contents = serde_json::to_vec_pretty(store)?;
    write_atomic(path, |tmp| tmp.write_all(&contents))
}

/// Writes through a temp file in the target's directory and renames it over
/// the target. The target is untouched unless every step succeeds.
pub(super) fn write_atomic<F>(path: &Path, write: F) -> LedgerResult<()>
where
    F: FnOnce(&mut NamedTempFile) -> io::Result<()>,
{
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    write(&mut tmp).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;

    tmp.persist(path).map_err(|err| LedgerError::Persist {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}
