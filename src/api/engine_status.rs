use serde::{Deserialize, Serialize};

use crate::logic::model::inference::{self, InferenceStats};
use crate::logic::model::{ModelBackend, ModelMetadata};
use crate::logic::worker::PoolStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub version: String,
    pub window_len: usize,
    pub model: ModelStatus,
    pub inference: InferenceStats,
    pub pool: PoolStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub backend: ModelBackend,
    pub trained: bool,
    pub sha256: Option<String>,
}

impl ModelStatus {
    /// `backend` is what the running model reports
    pub fn new(backend: ModelBackend, metadata: Option<&ModelMetadata>) -> Self {
        match metadata {
            Some(m) => Self {
                backend,
                trained: m.is_trained(),
                sha256: match &m.source {
                    inference::ModelSource::Trained { sha256, .. } => Some(sha256.clone()),
                    inference::ModelSource::Untrained { .. } => None,
                },
            },
            // Model supplied directly, provenance unknown
            None => Self {
                backend,
                trained: false,
                sha256: None,
            },
        }
    }
}
