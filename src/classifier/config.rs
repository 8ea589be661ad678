use serde::{Deserialize, Serialize};

use super::profile::Outcome;

/// Largest threshold shift `user_bias` can cause.
pub const BIAS_THRESHOLD_SHIFT: f64 = 0.2;

/// Tunable thresholds for the idle classifier. These are product-tuning
/// values; nothing structural depends on the specific numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Ascending upper bounds of the duration buckets, in seconds. A final
    /// open-ended bucket covers everything at or above the last bound.
    pub bucket_bounds_secs: Vec<u64>,

    /// Below this many observations in a bucket the classifier always prompts.
    pub min_samples: u32,

    /// Confidence at or above which an auto-decision is made.
    pub high_threshold: f64,

    /// Confidence at or above which a prompt carries a suggested answer.
    pub low_threshold: f64,

    /// z-score for the Wilson lower bound.
    pub z_score: f64,

    /// Oldest observations are evicted past this many.
    pub max_history: usize,

    pub indicator_medium_observations: usize,
    pub indicator_high_observations: usize,

    /// Let confident buckets decide without asking. When off every gap is
    /// prompted; the suggestion is still applied tentatively.
    pub implicit_trust: bool,

    /// From -1 (count only hands-on time) to 1 (count thinking time freely).
    /// Positive values lower the auto-accept threshold and raise the
    /// auto-discard one; negative values do the reverse.
    pub user_bias: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            bucket_bounds_secs: vec![180, 420, 900, 1500, 3600],
            min_samples: 5,
            high_threshold: 0.75,
            low_threshold: 0.45,
            z_score: 1.96,
            max_history: 200,
            indicator_medium_observations: 15,
            indicator_high_observations: 50,
            implicit_trust: true,
            user_bias: 0.0,
        }
    }
}

impl ClassifierConfig {
    /// Key of the bucket containing `idle_seconds`: `"0-180"`, `"180-420"`, ...,
    /// `"3600+"`.
    pub fn bucket_key(&self, idle_seconds: u64) -> String {
        let mut lower = 0;
        for &upper in &self.bucket_bounds_secs {
            if idle_seconds < upper {
                return format!("{lower}-{upper}");
            }
            lower = upper;
        }
        format!("{lower}+")
    }

    /// Confidence a bucket needs before `outcome` is applied automatically.
    /// Never drops below `low_threshold` or rises above 1.
    pub fn auto_threshold(&self, outcome: Outcome) -> f64 {
        let shift = self.user_bias.clamp(-1.0, 1.0) * BIAS_THRESHOLD_SHIFT;
        let threshold = match outcome {
            Outcome::Accept => self.high_threshold - shift,
            Outcome::Discard => self.high_threshold + shift,
        };
        threshold.clamp(self.low_threshold, 1.0)
    }

    /// Lower bound encoded in a bucket key, if the key is well formed.
    pub fn bucket_floor(key: &str) -> Option<u64> {
        let lower = key.split(['-', '+']).next()?;
        lower.parse().ok()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket_bounds_secs.is_empty() {
            return Err("classifier needs at least one bucket bound".into());
        }
        if self
            .bucket_bounds_secs
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
            || self.bucket_bounds_secs[0] == 0
        {
            return Err(format!(
                "bucket bounds must be positive and strictly ascending: {:?}",
                self.bucket_bounds_secs
            ));
        }
        if !(0.0..=1.0).contains(&self.low_threshold)
            || !(0.0..=1.0).contains(&self.high_threshold)
            || self.low_threshold > self.high_threshold
        {
            return Err(format!(
                "thresholds must satisfy 0 <= low ({}) <= high ({}) <= 1",
                self.low_threshold, self.high_threshold
            ));
        }
        if self.z_score <= 0.0 {
            return Err(format!("z_score {} must be positive", self.z_score));
        }
        if !(-1.0..=1.0).contains(&self.user_bias) {
            return Err(format!("user_bias {} must lie in [-1, 1]", self.user_bias));
        }
        if self.min_samples == 0 || self.max_history == 0 {
            return Err("min_samples and max_history must be non-zero".into());
        }
        Ok(())
    }
}
