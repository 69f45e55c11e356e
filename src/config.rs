// Learning Pipeline Configuration
//
// Defines configuration for the learning service and its background loops:
// rule thresholds, similarity cutoffs, quality constants, scheduling
// intervals, and batch sizes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main learning pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Rule engine decision thresholds
    #[serde(default)]
    pub rules: RuleThresholds,

    /// Vector similarity cutoffs
    #[serde(default)]
    pub similarity: SimilarityThresholds,

    /// Quality score constants
    #[serde(default)]
    pub quality: QualityThresholds,

    /// Background scheduler loops
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Named thresholds for the rule engine decision chain
///
/// These are deployment tunables; the decision logic in `rules` never
/// hard-codes them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuleThresholds {
    /// Minimum rating required for auto-approval
    pub min_approve_rating: i32,

    /// Minimum similar-feedback occurrences required for auto-approval
    pub min_occurrences: u32,

    /// Ratings at or below this value auto-flag
    pub max_flag_rating: i32,

    /// Accumulated negative feedback count that auto-flags
    pub flag_negative_count: u32,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            min_approve_rating: 5,
            min_occurrences: 3,
            max_flag_rating: 1,
            flag_negative_count: 5,
        }
    }
}

/// Similarity cutoffs for matching feedback against the vector index
///
/// Both depend on the embedding model's score distribution, so they are
/// configuration rather than literals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimilarityThresholds {
    /// Score above which a match is treated as "the same question"
    pub same_question: f32,

    /// Score above which positive/negative feedback reinforces a match
    pub reinforcement: f32,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            same_question: 0.95,
            reinforcement: 0.8,
        }
    }
}

/// Quality score constants for corpus mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum quality score required before pushing an entry to the index
    pub sync_threshold: f32,

    /// Initial score assigned to entries created from corrected feedback
    pub initial_corrected_score: f32,

    /// Quality delta for one reinforcement (positive feedback or correction)
    pub reinforcement_boost: f32,

    /// Quality delta for one negative feedback
    pub negative_penalty: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            sync_threshold: 0.4,
            initial_corrected_score: 0.75,
            reinforcement_boost: 0.05,
            negative_penalty: 0.03,
        }
    }
}

/// Configuration for the two independent scheduler loops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Decision-processing loop
    pub process: LoopConfig,

    /// Index-synchronization loop
    pub sync: LoopConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            process: LoopConfig {
                enabled: true,
                interval: Duration::from_secs(60),
                batch_size: 50,
            },
            sync: LoopConfig {
                enabled: true,
                interval: Duration::from_secs(300),
                batch_size: 100,
            },
        }
    }
}

/// Configuration for a single scheduler loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Enable/disable this loop
    pub enabled: bool,

    /// Interval between runs (in seconds)
    #[serde(with = "serde_duration")]
    pub interval: Duration,

    /// Maximum number of items to process per run
    pub batch_size: usize,
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl LearningConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: LearningConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: LearningConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=5).contains(&self.rules.min_approve_rating) {
            return Err(ConfigError::ValidationError(
                "rules: min_approve_rating must be between 1 and 5".to_string(),
            ));
        }
        if !(0..=5).contains(&self.rules.max_flag_rating) {
            return Err(ConfigError::ValidationError(
                "rules: max_flag_rating must be between 0 and 5".to_string(),
            ));
        }
        if self.rules.max_flag_rating >= self.rules.min_approve_rating {
            return Err(ConfigError::ValidationError(
                "rules: max_flag_rating must be below min_approve_rating".to_string(),
            ));
        }
        if self.rules.min_occurrences == 0 {
            return Err(ConfigError::ValidationError(
                "rules: min_occurrences must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("same_question", self.similarity.same_question),
            ("reinforcement", self.similarity.reinforcement),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "similarity: {} must be between 0.0 and 1.0",
                    name
                )));
            }
        }
        if self.similarity.same_question < self.similarity.reinforcement {
            return Err(ConfigError::ValidationError(
                "similarity: same_question must be at least reinforcement".to_string(),
            ));
        }

        if !(crate::types::QUALITY_FLOOR..=crate::types::QUALITY_CEIL)
            .contains(&self.quality.sync_threshold)
        {
            return Err(ConfigError::ValidationError(
                "quality: sync_threshold must be between 0.1 and 1.0".to_string(),
            ));
        }
        if !(crate::types::QUALITY_FLOOR..=crate::types::QUALITY_CEIL)
            .contains(&self.quality.initial_corrected_score)
        {
            return Err(ConfigError::ValidationError(
                "quality: initial_corrected_score must be between 0.1 and 1.0".to_string(),
            ));
        }
        if self.quality.reinforcement_boost <= 0.0 || self.quality.negative_penalty <= 0.0 {
            return Err(ConfigError::ValidationError(
                "quality: reinforcement_boost and negative_penalty must be positive".to_string(),
            ));
        }

        self.validate_loop_config("process", &self.scheduler.process)?;
        self.validate_loop_config("sync", &self.scheduler.sync)?;

        Ok(())
    }

    fn validate_loop_config(&self, name: &str, config: &LoopConfig) -> Result<(), ConfigError> {
        if config.interval < Duration::from_secs(1) {
            return Err(ConfigError::ValidationError(format!(
                "{}: interval must be at least 1 second",
                name
            )));
        }

        if config.batch_size == 0 || config.batch_size > 1000 {
            return Err(ConfigError::ValidationError(format!(
                "{}: batch_size must be between 1 and 1000",
                name
            )));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}
