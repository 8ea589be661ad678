use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::config::ClassifierConfig;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Default ceiling on a classifiable idle gap: 20 minutes.
pub const DEFAULT_IDLE_LIMIT_SECS: u64 = 20 * 60;

fn default_idle_limit() -> u64 {
    DEFAULT_IDLE_LIMIT_SECS
}

/// What the user wants done with an idle gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Count the gap as work.
    Accept,
    /// Count the gap as idle.
    Discard,
}

impl Outcome {
    pub fn from_accepted(accepted: bool) -> Self {
        if accepted {
            Outcome::Accept
        } else {
            Outcome::Discard
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Outcome::Accept => Outcome::Discard,
            Outcome::Discard => Outcome::Accept,
        }
    }

    pub fn is_accept(self) -> bool {
        self == Outcome::Accept
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub idle_seconds: u64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub accept_count: u32,
    pub discard_count: u32,
}

impl BucketCounts {
    pub fn total(&self) -> u32 {
        self.accept_count + self.discard_count
    }

    /// The more frequent outcome; `None` on a tie (including empty buckets).
    pub fn majority(&self) -> Option<Outcome> {
        match self.accept_count.cmp(&self.discard_count) {
            std::cmp::Ordering::Greater => Some(Outcome::Accept),
            std::cmp::Ordering::Less => Some(Outcome::Discard),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn majority_count(&self) -> u32 {
        self.accept_count.max(self.discard_count)
    }

    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Accept => self.accept_count += 1,
            Outcome::Discard => self.discard_count += 1,
        }
    }

    fn remove(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Accept => self.accept_count = self.accept_count.saturating_sub(1),
            Outcome::Discard => self.discard_count = self.discard_count.saturating_sub(1),
        }
    }
}

/// Per-installation learning state. `confidence_state` is always the bucket
/// tally of `history` under the active bucket bounds; eviction removes an
/// observation from both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningProfile {
    #[serde(default)]
    history: VecDeque<Observation>,
    #[serde(default)]
    confidence_state: BTreeMap<String, BucketCounts>,
    #[serde(default = "default_idle_limit")]
    idle_limit_secs: u64,
}

impl Default for LearningProfile {
    fn default() -> Self {
        Self {
            history: VecDeque::new(),
            confidence_state: BTreeMap::new(),
            idle_limit_secs: DEFAULT_IDLE_LIMIT_SECS,
        }
    }
}

impl LearningProfile {
    pub fn history(&self) -> impl Iterator<Item = &Observation> {
        self.history.iter()
    }

    pub fn total_observations(&self) -> usize {
        self.history.len()
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&str, &BucketCounts)> {
        self.confidence_state
            .iter()
            .map(|(key, counts)| (key.as_str(), counts))
    }

    pub fn counts(&self, bucket_key: &str) -> BucketCounts {
        self.confidence_state
            .get(bucket_key)
            .copied()
            .unwrap_or_default()
    }

    pub fn idle_limit_secs(&self) -> u64 {
        self.idle_limit_secs
    }

    /// Moves the idle limit by `delta_secs`, clamped to `[min, max]`.
    pub fn adjust_idle_limit(&mut self, delta_secs: i64, min: u64, max: u64) -> u64 {
        let shifted = self.idle_limit_secs as i64 + delta_secs;
        self.idle_limit_secs = (shifted.max(0) as u64).clamp(min, max);
        self.idle_limit_secs
    }

    pub fn record(&mut self, observation: Observation, config: &ClassifierConfig) {
        self.confidence_state
            .entry(config.bucket_key(observation.idle_seconds))
            .or_default()
            .add(observation.outcome);
        self.history.push_back(observation);

        while self.history.len() > config.max_history {
            if let Some(evicted) = self.history.pop_front() {
                self.forget(evicted, config);
            }
        }
    }

    fn forget(&mut self, observation: Observation, config: &ClassifierConfig) {
        let key = config.bucket_key(observation.idle_seconds);
        if let Some(counts) = self.confidence_state.get_mut(&key) {
            counts.remove(observation.outcome);
            if counts.total() == 0 {
                self.confidence_state.remove(&key);
            }
        }
    }

    /// Bucket tally of an observation sequence.
    pub fn tally<'a>(
        history: impl IntoIterator<Item = &'a Observation>,
        config: &ClassifierConfig,
    ) -> BTreeMap<String, BucketCounts> {
        let mut state: BTreeMap<String, BucketCounts> = BTreeMap::new();
        for observation in history {
            state
                .entry(config.bucket_key(observation.idle_seconds))
                .or_default()
                .add(observation.outcome);
        }
        state
    }

    /// Restores the history/state invariant after loading. History wins when
    /// present; a lone state is expanded back into synthetic observations at
    /// each bucket's lower bound. Returns true if anything changed.
    pub fn repair(&mut self, config: &ClassifierConfig) -> bool {
        let mut changed = false;

        if self.history.is_empty() && !self.confidence_state.is_empty() {
            log_warn!(
                "learning profile has counters but no history; rebuilding {} buckets",
                self.confidence_state.len()
            );
            self.history = synthesize_history(&self.confidence_state);
            changed = true;
        }

        while self.history.len() > config.max_history {
            self.history.pop_front();
            changed = true;
        }

        let recomputed = Self::tally(&self.history, config);
        if recomputed != self.confidence_state {
            if !changed {
                log_warn!("learning profile counters disagree with history; recomputing");
            }
            self.confidence_state = recomputed;
            changed = true;
        }

        changed
    }
}

fn synthesize_history(state: &BTreeMap<String, BucketCounts>) -> VecDeque<Observation> {
    let mut history = VecDeque::new();
    for (key, counts) in state {
        let Some(idle_seconds) = ClassifierConfig::bucket_floor(key) else {
            log_warn!("dropping unparseable bucket key {key:?}");
            continue;
        };
        for _ in 0..counts.accept_count {
            history.push_back(Observation {
                idle_seconds,
                outcome: Outcome::Accept,
            });
        }
        for _ in 0..counts.discard_count {
            history.push_back(Observation {
                idle_seconds,
                outcome: Outcome::Discard,
            });
        }
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(idle_seconds: u64, outcome: Outcome) -> Observation {
        Observation {
            idle_seconds,
            outcome,
        }
    }

    #[test]
    fn record_updates_the_matching_bucket() {
        let config = ClassifierConfig::default();
        let mut profile = LearningProfile::default();
        profile.record(obs(100, Outcome::Accept), &config);
        profile.record(obs(150, Outcome::Discard), &config);
        profile.record(obs(200, Outcome::Accept), &config);

        assert_eq!(
            profile.counts("0-180"),
            BucketCounts {
                accept_count: 1,
                discard_count: 1
            }
        );
        assert_eq!(profile.counts("180-420").accept_count, 1);
        assert_eq!(profile.total_observations(), 3);
    }

    #[test]
    fn eviction_keeps_state_equal_to_tally() {
        let config = ClassifierConfig {
            max_history: 4,
            ..ClassifierConfig::default()
        };
        let mut profile = LearningProfile::default();
        for i in 0..10u64 {
            let outcome = if i % 3 == 0 {
                Outcome::Discard
            } else {
                Outcome::Accept
            };
            profile.record(obs(i * 100, outcome), &config);
            assert_eq!(
                profile.confidence_state,
                LearningProfile::tally(&profile.history, &config)
            );
        }
        assert_eq!(profile.total_observations(), 4);
        assert!(profile.counts("0-180").total() == 0);
    }

    #[test]
    fn repair_recomputes_drifted_counters() {
        let config = ClassifierConfig::default();
        let mut profile = LearningProfile::default();
        profile.record(obs(60, Outcome::Accept), &config);
        profile.record(obs(60, Outcome::Accept), &config);
        profile
            .confidence_state
            .insert("0-180".into(), BucketCounts {
                accept_count: 40,
                discard_count: 3,
            });

        assert!(profile.repair(&config));
        assert_eq!(profile.counts("0-180").accept_count, 2);
        assert_eq!(profile.counts("0-180").discard_count, 0);
        assert!(!profile.repair(&config));
    }

    #[test]
    fn repair_rebuilds_missing_history_from_counters() {
        let config = ClassifierConfig::default();
        let mut profile = LearningProfile::default();
        profile.confidence_state.insert(
            "180-420".into(),
            BucketCounts {
                accept_count: 3,
                discard_count: 1,
            },
        );

        assert!(profile.repair(&config));
        assert_eq!(profile.total_observations(), 4);
        assert!(profile.history().all(|o| o.idle_seconds == 180));
        assert_eq!(profile.counts("180-420").accept_count, 3);
        assert_eq!(profile.counts("180-420").discard_count, 1);
    }

    #[test]
    fn repair_rebuckets_after_bound_change() {
        let old = ClassifierConfig::default();
        let mut profile = LearningProfile::default();
        profile.record(obs(500, Outcome::Accept), &old);

        let new = ClassifierConfig {
            bucket_bounds_secs: vec![600],
            ..ClassifierConfig::default()
        };
        assert!(profile.repair(&new));
        assert_eq!(profile.counts("0-600").accept_count, 1);
        assert_eq!(profile.counts("420-900").total(), 0);
    }

    #[test]
    fn idle_limit_adjusts_within_bounds() {
        let mut profile = LearningProfile::default();
        assert_eq!(profile.adjust_idle_limit(60, 900, 1500), 1260);
        assert_eq!(profile.adjust_idle_limit(10_000, 900, 1500), 1500);
        assert_eq!(profile.adjust_idle_limit(-100_000, 900, 1500), 900);
    }

    #[test]
    fn majority_and_ties() {
        let counts = BucketCounts {
            accept_count: 2,
            discard_count: 2,
        };
        assert_eq!(counts.majority(), None);
        let counts = BucketCounts {
            accept_count: 1,
            discard_count: 4,
        };
        assert_eq!(counts.majority(), Some(Outcome::Discard));
        assert_eq!(counts.majority_count(), 4);
    }

    #[test]
    fn serializes_with_lowercase_outcomes() {
        let config = ClassifierConfig::default();
        let mut profile = LearningProfile::default();
        profile.record(obs(30, Outcome::Discard), &config);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["history"][0]["outcome"], "discard");
        assert_eq!(json["confidence_state"]["0-180"]["discard_count"], 1);
    }
}
