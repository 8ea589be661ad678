use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Bytes hashed from the middle of larger files.
const SAMPLE_WINDOW: usize = 4096;
/// Files up to this size are hashed whole.
const WHOLE_FILE_LIMIT: u64 = 8192;
/// Hex characters kept in a fingerprint key.
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("failed to read image sample from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image dimensions unavailable ({width}x{height})")]
    MissingDimensions { width: u32, height: u32 },

    #[error("image content sample is empty")]
    EmptySample,

    #[error("host supplied no image probe")]
    MissingProbe,
}

/// Raw facts the host hands over about an image file. The host decodes the
/// container; we only see dimensions, the on-disk size and a slice of bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProbe {
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    pub sample: Vec<u8>,
}

impl ImageProbe {
    /// Builds a probe from the complete file contents, keeping only the sample
    /// window that feeds the digest.
    pub fn from_file_bytes(width: u32, height: u32, bytes: &[u8]) -> Self {
        Self {
            width,
            height,
            byte_size: bytes.len() as u64,
            sample: sample_window(bytes).to_vec(),
        }
    }

    /// Reads the sample window straight from disk without loading the whole file.
    pub fn read(path: &Path, width: u32, height: u32) -> Result<Self, FingerprintError> {
        let io_err = |source| FingerprintError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(io_err)?;
        let byte_size = file.metadata().map_err(io_err)?.len();

        let sample = if byte_size > WHOLE_FILE_LIMIT {
            let offset = byte_size / 2 - (SAMPLE_WINDOW as u64 / 2);
            file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
            let mut buf = vec![0u8; SAMPLE_WINDOW];
            file.read_exact(&mut buf).map_err(io_err)?;
            buf
        } else {
            let mut buf = Vec::with_capacity(byte_size as usize);
            file.read_to_end(&mut buf).map_err(io_err)?;
            buf
        };

        Ok(Self {
            width,
            height,
            byte_size,
            sample,
        })
    }
}

/// Middle 4 KiB of files larger than 8 KiB, the whole buffer otherwise. The
/// middle of the pixel data moves less than headers when only metadata changes.
pub fn sample_window(bytes: &[u8]) -> &[u8] {
    if bytes.len() as u64 > WHOLE_FILE_LIMIT {
        let start = bytes.len() / 2 - SAMPLE_WINDOW / 2;
        &bytes[start..start + SAMPLE_WINDOW]
    } else {
        bytes
    }
}

/// Content identity for files without an embedded UUID. Two fingerprints
/// identify the same file only when every field is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    pub sample_digest: String,
}

impl Fingerprint {
    pub fn compute(probe: &ImageProbe) -> Result<Self, FingerprintError> {
        if probe.width == 0 || probe.height == 0 {
            return Err(FingerprintError::MissingDimensions {
                width: probe.width,
                height: probe.height,
            });
        }
        if probe.sample.is_empty() {
            return Err(FingerprintError::EmptySample);
        }

        Ok(Self {
            width: probe.width,
            height: probe.height,
            byte_size: probe.byte_size,
            sample_digest: hex::encode(Sha256::digest(&probe.sample)),
        })
    }

    /// Ledger key for FINGERPRINT-mode records: a digest over all four fields.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("size:{}", self.byte_size).as_bytes());
        hasher.update(format!("dim:{}x{}", self.width, self.height).as_bytes());
        hasher.update(self.sample_digest.as_bytes());
        let mut key = hex::encode(hasher.finalize());
        key.truncate(KEY_LEN);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn probe(width: u32, height: u32, byte_size: u64, sample: &[u8]) -> ImageProbe {
        ImageProbe {
            width,
            height,
            byte_size,
            sample: sample.to_vec(),
        }
    }

    #[test]
    fn identical_fields_are_the_same_file() {
        let a = Fingerprint::compute(&probe(800, 600, 12_000, b"pixels")).unwrap();
        let b = Fingerprint::compute(&probe(800, 600, 12_000, b"pixels")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn any_differing_field_is_a_different_file() {
        let base = Fingerprint::compute(&probe(800, 600, 12_000, b"pixels")).unwrap();
        let variants = [
            probe(801, 600, 12_000, b"pixels"),
            probe(800, 601, 12_000, b"pixels"),
            probe(800, 600, 12_001, b"pixels"),
            probe(800, 600, 12_000, b"pixelz"),
        ];
        for variant in &variants {
            let other = Fingerprint::compute(variant).unwrap();
            assert_ne!(base, other);
            assert_ne!(base.key(), other.key());
        }
    }

    #[test]
    fn swapped_dimensions_do_not_collide() {
        let wide = Fingerprint::compute(&probe(600, 800, 10, b"x")).unwrap();
        let tall = Fingerprint::compute(&probe(800, 600, 10, b"x")).unwrap();
        assert_ne!(wide.key(), tall.key());
    }

    #[test]
    fn missing_metadata_fails() {
        assert!(matches!(
            Fingerprint::compute(&probe(0, 600, 10, b"x")),
            Err(FingerprintError::MissingDimensions { .. })
        ));
        assert!(matches!(
            Fingerprint::compute(&probe(800, 600, 0, b"")),
            Err(FingerprintError::EmptySample)
        ));
    }

    #[test]
    fn key_is_32_hex_chars() {
        let fp = Fingerprint::compute(&probe(1, 1, 1, b"a")).unwrap();
        let key = fp.key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn small_files_are_sampled_whole() {
        let bytes = vec![7u8; 5000];
        assert_eq!(sample_window(&bytes).len(), 5000);
    }

    #[test]
    fn large_files_sample_the_middle() {
        let mut bytes = vec![0u8; 20_000];
        bytes[10_000] = 42;
        let window = sample_window(&bytes);
        assert_eq!(window.len(), SAMPLE_WINDOW);
        assert_eq!(window[SAMPLE_WINDOW / 2], 42);
    }

    #[test]
    fn reading_from_disk_matches_in_memory_probe() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sketch.png");
        let bytes: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &bytes).unwrap();

        let from_disk = ImageProbe::read(&path, 640, 480).unwrap();
        let in_memory = ImageProbe::from_file_bytes(640, 480, &bytes);
        assert_eq!(from_disk, in_memory);
    }

    #[test]
    fn unreadable_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("gone.png");
        assert!(matches!(
            ImageProbe::read(&missing, 1, 1),
            Err(FingerprintError::Io { .. })
        ));
    }
}
