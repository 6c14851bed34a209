//! Engine tuning knobs.
//!
//! The wire names are the camelCase keys the game's settings screen writes,
//! so a settings blob can be fed straight into [`EngineConfig::from_json`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Memory and event scheduling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Maximum number of short-term memory entries.
    pub short_term_limit: usize,

    /// Mid-term size at which compaction starts.
    pub mid_term_trigger_threshold: usize,

    /// Mid-term entries left in place after compaction.
    pub mid_term_keep_count: usize,

    pub events_enabled: bool,

    /// Earliest next event, in in-game years from now.
    pub event_min_years: u32,

    /// Latest next event, in in-game years from now.
    pub event_max_years: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_term_limit: 5,
            mid_term_trigger_threshold: 20,
            mid_term_keep_count: 8,
            events_enabled: true,
            event_min_years: 1,
            event_max_years: 5,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_short_term_limit(mut self, limit: usize) -> Self {
        self.short_term_limit = limit;
        self
    }

    /// Set the compaction trigger and how many entries survive it.
    pub fn with_mid_term(mut self, trigger: usize, keep: usize) -> Self {
        self.mid_term_trigger_threshold = trigger;
        self.mid_term_keep_count = keep;
        self
    }

    pub fn with_events(mut self, enabled: bool) -> Self {
        self.events_enabled = enabled;
        self
    }

    pub fn with_event_years(mut self, min: u32, max: u32) -> Self {
        self.event_min_years = min;
        self.event_max_years = max;
        self
    }

    /// Parse a settings blob; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    /// Load settings from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Clamp values into a usable range, logging each adjustment.
    ///
    /// Afterwards: `short_term_limit >= 1`, `1 <= keep < trigger`, and
    /// `1 <= event_min_years <= event_max_years`.
    pub fn validated(mut self) -> Self {
        if self.short_term_limit == 0 {
            tracing::warn!("shortTermLimit of 0 raised to 1");
            self.short_term_limit = 1;
        }
        if self.mid_term_trigger_threshold < 2 {
            tracing::warn!(
                value = self.mid_term_trigger_threshold,
                "midTermTriggerThreshold raised to 2"
            );
            self.mid_term_trigger_threshold = 2;
        }
        if self.mid_term_keep_count >= self.mid_term_trigger_threshold {
            let keep = self.mid_term_trigger_threshold - 1;
            tracing::warn!(
                value = self.mid_term_keep_count,
                clamped = keep,
                "midTermKeepCount must be below the trigger threshold"
            );
            self.mid_term_keep_count = keep;
        }
        if self.mid_term_keep_count == 0 {
            tracing::warn!("midTermKeepCount of 0 raised to 1");
            self.mid_term_keep_count = 1;
        }
        if self.event_min_years == 0 {
            tracing::warn!("eventMinYears of 0 raised to 1");
            self.event_min_years = 1;
        }
        if self.event_max_years < self.event_min_years {
            tracing::warn!(
                min = self.event_min_years,
                max = self.event_max_years,
                "eventMaxYears below eventMinYears; using the minimum for both"
            );
            self.event_max_years = self.event_min_years;
        }
        self
    }

    /// How many mid-term entries one compaction consumes.
    pub fn compaction_batch(&self) -> usize {
        self.mid_term_trigger_threshold
            .saturating_sub(self.mid_term_keep_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_uses_wire_names_and_defaults() {
        let config =
            EngineConfig::from_json(r#"{"shortTermLimit": 3, "eventsEnabled": false}"#).unwrap();
        assert_eq!(config.short_term_limit, 3);
        assert!(!config.events_enabled);
        assert_eq!(config.mid_term_trigger_threshold, 20);
        assert_eq!(config.compaction_batch(), 12);
    }

    #[test]
    fn test_validated_clamps() {
        let config = EngineConfig::new()
            .with_short_term_limit(0)
            .with_mid_term(4, 9)
            .with_event_years(0, 0)
            .validated();
        assert_eq!(config.short_term_limit, 1);
        assert_eq!(config.mid_term_keep_count, 3);
        assert_eq!(config.event_min_years, 1);
        assert_eq!(config.event_max_years, 1);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            EngineConfig::from_json("{shortTermLimit"),
            Err(ConfigError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"midTermTriggerThreshold": 10, "midTermKeepCount": 4}"#)
            .expect("write settings");

        let config = EngineConfig::load(&path).await.expect("Load should succeed");
        assert_eq!(config.compaction_batch(), 6);
    }
}
