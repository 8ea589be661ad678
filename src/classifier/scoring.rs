use serde::{Deserialize, Serialize};

use super::config::ClassifierConfig;
use super::profile::{BucketCounts, LearningProfile, Outcome};

/// Classifier verdict for one idle gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    AutoAccept,
    AutoDiscard,
    Prompt,
}

impl Decision {
    pub fn is_automatic(self) -> bool {
        !matches!(self, Decision::Prompt)
    }

    /// Outcome an automatic decision applies; `None` for prompts.
    pub fn auto_outcome(self) -> Option<Outcome> {
        match self {
            Decision::AutoAccept => Some(Outcome::Accept),
            Decision::AutoDiscard => Some(Outcome::Discard),
            Decision::Prompt => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub idle_seconds: u64,
    pub bucket: String,
    pub samples: u32,
    pub confidence: f64,
    pub band: ConfidenceBand,
    /// Outcome shown as the default answer on a prompt, and applied
    /// tentatively while the prompt is open.
    pub suggestion: Option<Outcome>,
    pub decision: Decision,
}

impl Assessment {
    /// Outcome applied immediately, before any user answer.
    pub fn tentative_outcome(&self) -> Outcome {
        self.decision
            .auto_outcome()
            .or(self.suggestion)
            .unwrap_or(Outcome::Discard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccuracyLevel {
    Learning,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyIndicator {
    pub level: AccuracyLevel,
    /// Sample-weighted mean bucket confidence, 0-100.
    pub percent: f64,
    pub observations: usize,
}

/// Wilson score interval lower bound for `successes` out of `total`.
pub fn wilson_lower_bound(successes: u32, total: u32, z: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    let p = successes as f64 / n;
    let z2 = z * z;
    let denominator = 1.0 + z2 / n;
    let centre = p + z2 / (2.0 * n);
    let spread = z * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt();
    ((centre - spread) / denominator).clamp(0.0, 1.0)
}

/// Confidence that the bucket's majority outcome is what the user wants.
pub fn bucket_confidence(counts: &BucketCounts, config: &ClassifierConfig) -> f64 {
    wilson_lower_bound(counts.majority_count(), counts.total(), config.z_score)
}

pub fn band_for(confidence: f64, config: &ClassifierConfig) -> ConfidenceBand {
    if confidence >= config.high_threshold {
        ConfidenceBand::High
    } else if confidence >= config.low_threshold {
        ConfidenceBand::Medium
    } else {
        ConfidenceBand::Low
    }
}

pub fn assess(profile: &LearningProfile, config: &ClassifierConfig, idle_seconds: u64) -> Assessment {
    let bucket = config.bucket_key(idle_seconds);
    let counts = profile.counts(&bucket);
    let confidence = bucket_confidence(&counts, config);
    let band = band_for(confidence, config);
    let majority = counts.majority();
    let warm = counts.total() >= config.min_samples;

    let decision = match majority {
        Some(outcome)
            if warm && config.implicit_trust && confidence >= config.auto_threshold(outcome) =>
        {
            match outcome {
                Outcome::Accept => Decision::AutoAccept,
                Outcome::Discard => Decision::AutoDiscard,
            }
        }
        _ => Decision::Prompt,
    };

    let suggestion = match band {
        ConfidenceBand::Low => None,
        ConfidenceBand::Medium | ConfidenceBand::High => majority,
    };

    Assessment {
        idle_seconds,
        bucket,
        samples: counts.total(),
        confidence,
        band,
        suggestion,
        decision,
    }
}

pub fn accuracy_indicator(profile: &LearningProfile, config: &ClassifierConfig) -> AccuracyIndicator {
    let observations = profile.total_observations();

    let (weighted, weight) = profile
        .buckets()
        .fold((0.0, 0.0), |(sum, total), (_, counts)| {
            let n = counts.total() as f64;
            (sum + bucket_confidence(counts, config) * n, total + n)
        });
    let mean = if weight > 0.0 { weighted / weight } else { 0.0 };

    let level = if observations >= config.indicator_high_observations
        && mean >= config.high_threshold
    {
        AccuracyLevel::High
    } else if observations >= config.indicator_medium_observations && mean >= config.low_threshold
    {
        AccuracyLevel::Medium
    } else {
        AccuracyLevel::Learning
    };

    AccuracyIndicator {
        level,
        percent: mean * 100.0,
        observations,
    }
}
