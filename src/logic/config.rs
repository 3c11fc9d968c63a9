//! Engine Configuration
//!
//! Loaded from environment variables (and `.env` via dotenvy) with
//! defaults from `constants.rs`.

use std::env;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_BACKFILL_COUNT, DEFAULT_DATABASE_FILE, DEFAULT_DROPOUT_RATIO, DEFAULT_HIDDEN_SIZE,
    DEFAULT_INPUT_SIZE, DEFAULT_MODEL_FILE, DEFAULT_MODEL_ID, DEFAULT_NUM_LAYERS,
    DEFAULT_SCORING_QUEUE_CAPACITY, DEFAULT_SCORING_WORKERS, DEFAULT_USE_ACT,
    DEFAULT_WINDOW_LEN, FALLBACK_THRESHOLD,
};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("window length must be at least 2, got {0}")]
    WindowTooShort(usize),
    #[error("only univariate flow input is supported, got input size {0}")]
    UnsupportedInputSize(usize),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("dropout ratio must lie in [0, 1), got {0}")]
    InvalidDropout(f32),
}

/// Autoencoder architecture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    /// Training-time only; inference runs in eval mode
    pub dropout_ratio: f32,
    /// Window length W
    pub window_len: usize,
    /// Sigmoid on the output head
    pub use_act: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            num_layers: DEFAULT_NUM_LAYERS,
            dropout_ratio: DEFAULT_DROPOUT_RATIO,
            window_len: DEFAULT_WINDOW_LEN,
            use_act: DEFAULT_USE_ACT,
        }
    }
}

impl ModelConfig {
    /// Reject architectures the scorer cannot feed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_len < 2 {
            return Err(ConfigError::WindowTooShort(self.window_len));
        }
        if self.input_size != 1 {
            return Err(ConfigError::UnsupportedInputSize(self.input_size));
        }
        if self.hidden_size == 0 {
            return Err(ConfigError::Zero("hidden size"));
        }
        if self.num_layers == 0 {
            return Err(ConfigError::Zero("layer count"));
        }
        if !(0.0..1.0).contains(&self.dropout_ratio) {
            return Err(ConfigError::InvalidDropout(self.dropout_ratio));
        }
        Ok(())
    }
}

/// Scoring worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum scoring jobs running at once
    pub workers: usize,
    /// Jobs waiting beyond the running ones before submissions are rejected
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_SCORING_WORKERS,
            queue_capacity: DEFAULT_SCORING_QUEUE_CAPACITY,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Persisted weights (`.json`) or ONNX export (`.onnx`)
    pub model_path: PathBuf,

    pub model: ModelConfig,

    /// Stamped on every prediction record
    pub model_id: u32,

    /// SQLite database file
    pub database_path: PathBuf,

    pub pool: PoolConfig,

    /// Batch job: measurements backfilled per device
    pub backfill_count: usize,

    /// Threshold used when calibration has nothing to work with
    pub fallback_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: data_dir().join(DEFAULT_MODEL_FILE),
            model: ModelConfig::default(),
            model_id: DEFAULT_MODEL_ID,
            database_path: data_dir().join(DEFAULT_DATABASE_FILE),
            pool: PoolConfig::default(),
            backfill_count: DEFAULT_BACKFILL_COUNT,
            fallback_threshold: FALLBACK_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            model_path: model_path_from(|key| env::var(key).ok())
                .unwrap_or(defaults.model_path),

            model: ModelConfig {
                input_size: parse_var("LSTMAE_INPUT_SIZE", defaults.model.input_size),
                hidden_size: parse_var("LSTMAE_HIDDEN_SIZE", defaults.model.hidden_size),
                num_layers: parse_var("LSTMAE_NUM_LAYERS", defaults.model.num_layers),
                dropout_ratio: parse_var("LSTMAE_DROPOUT_RATIO", defaults.model.dropout_ratio),
                window_len: parse_var("LSTMAE_SEQ_LEN", defaults.model.window_len),
                use_act: env::var("LSTMAE_USE_ACT")
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(defaults.model.use_act),
            },

            model_id: parse_var("FLOW_MODEL_ID", defaults.model_id),

            database_path: env::var("FLOW_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),

            pool: PoolConfig {
                workers: parse_var("SCORING_WORKERS", defaults.pool.workers),
                queue_capacity: parse_var("SCORING_QUEUE_CAPACITY", defaults.pool.queue_capacity),
            },

            backfill_count: parse_var("BACKFILL_COUNT", defaults.backfill_count),

            fallback_threshold: defaults.fallback_threshold,
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;
        if self.pool.workers == 0 {
            return Err(ConfigError::Zero("scoring workers"));
        }
        if self.pool.queue_capacity == 0 {
            return Err(ConfigError::Zero("scoring queue capacity"));
        }
        Ok(())
    }
}

/// Default data directory
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flow-sentinel")
}

/// `FLOW_MODEL_PATH`, else the legacy `LSTM_AE_MODEL_PATH`
fn model_path_from(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    ["FLOW_MODEL_PATH", "LSTM_AE_MODEL_PATH"]
        .into_iter()
        .find_map(lookup)
        .map(PathBuf::from)
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.model.window_len, 168);
        assert_eq!(config.model.hidden_size, 32);
        assert_eq!(config.fallback_threshold, 0.015);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.model.window_len = 1;
        assert_eq!(config.validate(), Err(ConfigError::WindowTooShort(1)));

        let mut config = EngineConfig::default();
        config.model.input_size = 3;
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedInputSize(3)));

        let mut config = EngineConfig::default();
        config.pool.workers = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("scoring workers")));

        let mut config = EngineConfig::default();
        config.model.window_len = 0;
        assert_eq!(config.model.validate(), Err(ConfigError::WindowTooShort(0)));
    }

    #[test]
    fn test_model_path_accepts_legacy_variable() {
        let legacy = |key: &str| (key == "LSTM_AE_MODEL_PATH").then(|| "/models/legacy.json".to_string());
        assert_eq!(model_path_from(legacy), Some(PathBuf::from("/models/legacy.json")));

        let both = |key: &str| match key {
            "FLOW_MODEL_PATH" => Some("/models/flow.onnx".to_string()),
            "LSTM_AE_MODEL_PATH" => Some("/models/legacy.json".to_string()),
            _ => None,
        };
        assert_eq!(model_path_from(both), Some(PathBuf::from("/models/flow.onnx")));

        assert_eq!(model_path_from(|_: &str| None), None);
    }
}
