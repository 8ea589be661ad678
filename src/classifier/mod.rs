pub mod config;
pub mod profile;
pub mod scoring;

pub use config::ClassifierConfig;
pub use profile::{BucketCounts, LearningProfile, Observation, Outcome, DEFAULT_IDLE_LIMIT_SECS};
pub use scoring::{AccuracyIndicator, AccuracyLevel, Assessment, ConfidenceBand, Decision};

/// Decides what to do with idle gaps from the user's past answers.
#[derive(Debug, Clone, Default)]
pub struct IdleClassifier {
    config: ClassifierConfig,
}

impl IdleClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn assess(&self, profile: &LearningProfile, idle_seconds: u64) -> Assessment {
        scoring::assess(profile, &self.config, idle_seconds)
    }

    pub fn indicator(&self, profile: &LearningProfile) -> AccuracyIndicator {
        scoring::accuracy_indicator(profile, &self.config)
    }
}
