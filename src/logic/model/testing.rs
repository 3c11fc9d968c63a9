//! Deterministic reconstruction models for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{Array3, ArrayView3, Axis};

use super::inference::{InferenceError, ModelBackend, ReconstructionModel};
use crate::logic::config::{EngineConfig, ModelConfig};
use crate::logic::context::EngineContext;

/// Returns its input unchanged
pub struct IdentityModel;

impl ReconstructionModel for IdentityModel {
    fn backend(&self) -> ModelBackend {
        ModelBackend::Custom
    }

    fn reconstruct(&self, batch: ArrayView3<'_, f32>) -> Result<Array3<f32>, InferenceError> {
        Ok(batch.to_owned())
    }
}

/// Reconstructs every step as the mean of its sequence
pub struct MeanModel;

impl ReconstructionModel for MeanModel {
    fn backend(&self) -> ModelBackend {
        ModelBackend::Custom
    }

    fn reconstruct(&self, batch: ArrayView3<'_, f32>) -> Result<Array3<f32>, InferenceError> {
        let mut out = batch.to_owned();
        for mut seq in out.axis_iter_mut(Axis(0)) {
            let mean = seq.mean().unwrap_or(0.0);
            seq.fill(mean);
        }
        Ok(out)
    }
}

/// Input shifted by a constant
pub struct OffsetModel(pub f32);

impl ReconstructionModel for OffsetModel {
    fn backend(&self) -> ModelBackend {
        ModelBackend::Custom
    }

    fn reconstruct(&self, batch: ArrayView3<'_, f32>) -> Result<Array3<f32>, InferenceError> {
        Ok(batch.mapv(|v| v + self.0))
    }
}

/// Always fails, counting calls
#[derive(Default)]
pub struct FailingModel {
    pub calls: AtomicUsize,
}

impl ReconstructionModel for FailingModel {
    fn backend(&self) -> ModelBackend {
        ModelBackend::Custom
    }

    fn reconstruct(&self, _batch: ArrayView3<'_, f32>) -> Result<Array3<f32>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(InferenceError::Runtime("backend offline".to_string()))
    }
}

/// Context around `model` with window length `window_len`
pub fn context(model: Arc<dyn ReconstructionModel>, window_len: usize) -> EngineContext {
    let config = EngineConfig {
        model: ModelConfig {
            window_len,
            ..Default::default()
        },
        ..Default::default()
    };
    EngineContext::new(model, config).unwrap()
}
