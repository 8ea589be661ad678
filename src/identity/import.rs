use serde::{Deserialize, Serialize};

/// Tuning for converting a document's embedded editing time into a starting
/// total. Editors only count time with input focus on the canvas, so the raw
/// value undercounts planning; short histories undercount proportionally more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Raw values below this are ignored.
    pub floor_secs: u64,
    /// Multiplier the curve approaches for very long histories.
    pub asymptote: f64,
    pub scale: f64,
    pub offset: f64,
    /// Ceiling for very short histories.
    pub max_multiplier: f64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            floor_secs: 60,
            asymptote: 1.0,
            scale: 0.71,
            offset: 1.48,
            max_multiplier: 1.5,
        }
    }
}

impl ImportConfig {
    /// `asymptote + scale / (offset + log10(minutes))`, capped at
    /// `max_multiplier`. Minutes are clamped to 0.5 to stay clear of log(0).
    ///
    /// With the defaults: 2 min → ~1.40, 10 min → ~1.29, 2 h → ~1.20.
    pub fn multiplier(&self, raw_secs: u64) -> f64 {
        let minutes = (raw_secs as f64 / 60.0).max(0.5);
        let curve = self.asymptote + self.scale / (self.offset + minutes.log10());
        curve.min(self.max_multiplier)
    }

    /// Adjusted starting seconds, or `None` when the raw value is missing or
    /// under the floor.
    pub fn adjusted_seconds(&self, raw_secs: Option<u64>) -> Option<u64> {
        let raw = raw_secs?;
        if raw < self.floor_secs {
            return None;
        }
        Some((raw as f64 * self.multiplier(raw)).floor() as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.asymptote < 1.0 {
            return Err(format!("import asymptote {} must be >= 1.0", self.asymptote));
        }
        if self.scale <= 0.0 {
            return Err(format!("import scale {} must be positive", self.scale));
        }
        // The denominator must stay positive at the 0.5 minute clamp.
        if self.offset + 0.5f64.log10() <= 0.0 {
            return Err(format!("import offset {} too small", self.offset));
        }
        if self.max_multiplier <= self.asymptote {
            return Err(format!(
                "import max_multiplier {} must exceed asymptote {}",
                self.max_multiplier, self.asymptote
            ));
        }
        Ok(())
    }
}
