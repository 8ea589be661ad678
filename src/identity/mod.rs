pub mod fingerprint;
pub mod import;
pub mod resolver;

pub use fingerprint::{Fingerprint, FingerprintError, ImageProbe};
pub use import::ImportConfig;
pub use resolver::{plan_save, probe_for, resolve, Resolution, SaveAction};
