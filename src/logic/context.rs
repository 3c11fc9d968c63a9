//! Engine Context
//!
//! Model handle + configuration, passed by reference into every call
//! instead of living in process-wide statics.

use std::sync::Arc;

use super::config::{ConfigError, EngineConfig};
use super::model::ReconstructionModel;

#[derive(Clone)]
pub struct EngineContext {
    model: Arc<dyn ReconstructionModel>,
    config: Arc<EngineConfig>,
}

impl EngineContext {
    /// Fails when `config` does not validate
    pub fn new(model: Arc<dyn ReconstructionModel>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        log::debug!(
            "Engine context: {:?} backend, window {}",
            model.backend(),
            config.model.window_len
        );
        Ok(Self {
            model,
            config: Arc::new(config),
        })
    }

    pub fn model(&self) -> &dyn ReconstructionModel {
        self.model.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Window length W every scored sequence must have
    pub fn window_len(&self) -> usize {
        self.config.model.window_len
    }

    pub fn fallback_threshold(&self) -> f64 {
        self.config.fallback_threshold
    }
}
