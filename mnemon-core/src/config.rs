//! Configuration for the memory system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ensure_unit_interval, Error, Result};

/// Weights used by the weighted retrieval engine.
///
/// Weights are applied as given; they are not required to sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecallWeights {
    pub importance: f64,
    pub recency: f64,
    pub relevance: f64,
}

impl RecallWeights {
    pub fn new(importance: f64, recency: f64, relevance: f64) -> Self {
        Self {
            importance,
            recency,
            relevance,
        }
    }

    /// Rank on importance alone.
    pub fn importance_only() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }

    /// Reject negative or non-finite weights.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("importance_weight", self.importance),
            ("recency_weight", self.recency),
            ("relevance_weight", self.relevance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::invalid_argument(
                    name,
                    format!("weights must be finite and non-negative, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for RecallWeights {
    fn default() -> Self {
        Self::new(0.4, 0.3, 0.3)
    }
}

/// Configuration for the memory system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// SQLite database file; `None` keeps everything in memory.
    /// A leading `~` is expanded to the home directory.
    pub database_path: Option<String>,
    /// Identifier reported alongside the persona map
    pub ai_instance_id: String,
    /// Half-life of the recency signal in hours
    pub recency_half_life_hours: f64,
    /// Records not accessed for this long are decayed by a sweep
    pub staleness_threshold_hours: f64,
    /// Records whose salience falls below this are archived
    pub eviction_floor: f64,
    /// Relevance bonus when a query token equals a tag
    pub tag_match_bonus: f64,
    /// Maximum related memories gathered per reflection
    pub reflection_related_limit: usize,
    /// Weighting used when gathering related memories for a reflection
    pub reflection_weights: RecallWeights,
    /// Also store each reflection as a `reflection` memory
    pub mirror_reflections_as_memories: bool,
    /// Importance given to mirrored reflection memories
    pub reflection_importance: f64,
    /// Records fetched per page during a decay sweep
    pub sweep_batch_size: usize,
    /// Interval between scheduled decay sweeps in seconds
    pub sweep_interval_secs: u64,
    /// Decay factor used by scheduled sweeps
    pub default_decay_factor: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            ai_instance_id: "default".to_string(),
            recency_half_life_hours: 72.0,
            staleness_threshold_hours: 24.0,
            eviction_floor: 0.05,
            tag_match_bonus: 0.2,
            reflection_related_limit: 5,
            reflection_weights: RecallWeights::new(0.3, 0.2, 0.5),
            mirror_reflections_as_memories: true,
            reflection_importance: 0.6,
            sweep_batch_size: 128,
            sweep_interval_secs: 3600,
            default_decay_factor: 0.1,
        }
    }
}

impl MemoryConfig {
    /// Create configuration from `MNEMON_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: std::env::var("MNEMON_DB_PATH").ok(),
            ai_instance_id: std::env::var("MNEMON_AI_INSTANCE_ID")
                .unwrap_or(defaults.ai_instance_id),
            recency_half_life_hours: env_parse("MNEMON_RECENCY_HALF_LIFE_HOURS")
                .unwrap_or(defaults.recency_half_life_hours),
            staleness_threshold_hours: env_parse("MNEMON_STALENESS_HOURS")
                .unwrap_or(defaults.staleness_threshold_hours),
            eviction_floor: env_parse("MNEMON_EVICTION_FLOOR").unwrap_or(defaults.eviction_floor),
            sweep_interval_secs: env_parse("MNEMON_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval_secs),
            default_decay_factor: env_parse("MNEMON_DECAY_FACTOR")
                .unwrap_or(defaults.default_decay_factor),
            mirror_reflections_as_memories: std::env::var("MNEMON_MIRROR_REFLECTIONS")
                .map(|s| s != "0" && s.to_lowercase() != "false")
                .unwrap_or(defaults.mirror_reflections_as_memories),
            ..defaults
        }
    }

    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// In-memory configuration (for testing).
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Persist to the given SQLite file.
    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_staleness_threshold_hours(mut self, hours: f64) -> Self {
        self.staleness_threshold_hours = hours;
        self
    }

    pub fn with_eviction_floor(mut self, floor: f64) -> Self {
        self.eviction_floor = floor;
        self
    }

    pub fn with_recency_half_life_hours(mut self, hours: f64) -> Self {
        self.recency_half_life_hours = hours;
        self
    }

    pub fn with_ai_instance_id(mut self, id: impl Into<String>) -> Self {
        self.ai_instance_id = id.into();
        self
    }

    pub fn with_mirrored_reflections(mut self, mirror: bool) -> Self {
        self.mirror_reflections_as_memories = mirror;
        self
    }

    /// Database path with `~` expanded, if any.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }

    /// Decay constant λ for `exp(-λ · age_hours)`.
    pub fn recency_lambda(&self) -> f64 {
        std::f64::consts::LN_2 / self.recency_half_life_hours
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> Result<()> {
        if !(self.recency_half_life_hours.is_finite() && self.recency_half_life_hours > 0.0) {
            return Err(Error::Config(format!(
                "recency_half_life_hours must be positive, got {}",
                self.recency_half_life_hours
            )));
        }
        if !(self.staleness_threshold_hours.is_finite() && self.staleness_threshold_hours >= 0.0) {
            return Err(Error::Config(format!(
                "staleness_threshold_hours must be non-negative, got {}",
                self.staleness_threshold_hours
            )));
        }
        if self.sweep_batch_size == 0 {
            return Err(Error::Config("sweep_batch_size must be at least 1".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be at least 1".to_string()));
        }
        for (name, value) in [
            ("eviction_floor", self.eviction_floor),
            ("tag_match_bonus", self.tag_match_bonus),
            ("reflection_importance", self.reflection_importance),
            ("default_decay_factor", self.default_decay_factor),
        ] {
            ensure_unit_interval(name, value).map_err(|e| Error::Config(e.to_string()))?;
        }
        self.reflection_weights
            .validate()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
