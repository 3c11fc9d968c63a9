//! Inference Engine - Reconstruction model abstraction
//!
//! Loads the trained autoencoder (native weights or ONNX export) once at
//! startup. A missing or unloadable artifact degrades to untrained weights.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::logic::config::{ConfigError, ModelConfig};
use super::lstm::LstmAutoencoder;
use super::onnx::OnnxReconstructor;
use super::scaler::ScalerError;

// ============================================================================
// STATE
// ============================================================================

/// Latency stats
static LATENCY_SUM_US: AtomicU64 = AtomicU64::new(0);
static INFERENCE_COUNT: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("expected input of shape (n, {expected}, 1), got {actual:?}")]
    ShapeMismatch { expected: usize, actual: Vec<usize> },

    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    #[error("model produced a non-finite value")]
    NonFiniteOutput,

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("scaling failed: {0}")]
    Scaling(#[from] ScalerError),

    #[error("array error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("weights parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// RECONSTRUCTION MODEL TRAIT
// ============================================================================

/// Pure sequence-to-sequence reconstruction.
///
/// Input and output are `(batch, W, 1)`. Implementations must not mutate
/// observable state in `reconstruct`; one instance serves all scorers.
pub trait ReconstructionModel: Send + Sync {
    fn backend(&self) -> ModelBackend;

    fn reconstruct(&self, batch: ArrayView3<'_, f32>) -> Result<Array3<f32>, InferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelBackend {
    NativeLstm,
    Onnx,
    Custom,
}

/// Where the weights came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    Trained { path: PathBuf, sha256: String },
    Untrained { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub backend: ModelBackend,
    pub source: ModelSource,
    pub window_len: usize,
    pub loaded_at: DateTime<Utc>,
}

impl ModelMetadata {
    pub fn is_trained(&self) -> bool {
        matches!(self.source, ModelSource::Trained { .. })
    }
}

pub struct LoadedModel {
    pub model: Arc<dyn ReconstructionModel>,
    pub metadata: ModelMetadata,
}

/// Inference latency stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceStats {
    pub avg_latency_ms: f32,
    pub inference_count: u64,
}

// ============================================================================
// LOADING
// ============================================================================

/// Load the model artifact at `path`, falling back to untrained weights.
/// Only an invalid `config` is an error.
pub fn load_model(path: &Path, config: &ModelConfig) -> Result<LoadedModel, ConfigError> {
    config.validate()?;
    Ok(match try_load_model(path, config) {
        Ok(loaded) => loaded,
        Err(e) => {
            log::warn!("Model load failed ({}), using untrained weights", e);
            untrained_model(config, e.to_string())
        }
    })
}

/// Load the model artifact at `path`
pub fn try_load_model(path: &Path, config: &ModelConfig) -> Result<LoadedModel, InferenceError> {
    log::info!("Loading reconstruction model from: {:?}", path);

    if !path.exists() {
        return Err(InferenceError::NotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path)?;
    let sha256 = fingerprint(&bytes);

    let is_onnx = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("onnx"));

    let (model, backend): (Arc<dyn ReconstructionModel>, ModelBackend) = if is_onnx {
        let onnx = OnnxReconstructor::from_bytes(&bytes, config.window_len)?;
        (Arc::new(onnx), ModelBackend::Onnx)
    } else {
        let lstm = LstmAutoencoder::from_json(&bytes, config)?;
        (Arc::new(lstm), ModelBackend::NativeLstm)
    };

    log::info!("Model loaded ({:?}, sha256 {})", backend, &sha256[..12]);

    Ok(LoadedModel {
        model,
        metadata: ModelMetadata {
            backend,
            source: ModelSource::Trained {
                path: path.to_path_buf(),
                sha256,
            },
            window_len: config.window_len,
            loaded_at: Utc::now(),
        },
    })
}

/// Randomly initialized native autoencoder
pub fn untrained_model(config: &ModelConfig, reason: String) -> LoadedModel {
    let lstm = LstmAutoencoder::random(config, &mut rand::thread_rng());

    LoadedModel {
        model: Arc::new(lstm),
        metadata: ModelMetadata {
            backend: ModelBackend::NativeLstm,
            source: ModelSource::Untrained { reason },
            window_len: config.window_len,
            loaded_at: Utc::now(),
        },
    }
}

/// SHA-256 of a model artifact, hex encoded
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Check that `batch` is `(n, window_len, 1)` with n > 0
pub fn check_input(batch: &ArrayView3<'_, f32>, window_len: usize) -> Result<(), InferenceError> {
    let shape = batch.shape();
    if shape[0] == 0 || shape[1] != window_len || shape[2] != 1 {
        return Err(InferenceError::ShapeMismatch {
            expected: window_len,
            actual: shape.to_vec(),
        });
    }
    Ok(())
}

/// Run the model and verify the output matches the input shape
pub fn reconstruct_checked(
    model: &dyn ReconstructionModel,
    batch: ArrayView3<'_, f32>,
    window_len: usize,
) -> Result<Array3<f32>, InferenceError> {
    check_input(&batch, window_len)?;

    let start_time = std::time::Instant::now();
    let output = model.reconstruct(batch.view())?;

    LATENCY_SUM_US.fetch_add(start_time.elapsed().as_micros() as u64, Ordering::Relaxed);
    INFERENCE_COUNT.fetch_add(1, Ordering::Relaxed);

    if output.shape() != batch.shape() {
        return Err(InferenceError::ShapeMismatch {
            expected: window_len,
            actual: output.shape().to_vec(),
        });
    }
    if output.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::NonFiniteOutput);
    }
    Ok(output)
}

/// Squared reconstruction error at the last timestep of every sequence,
/// averaged over the feature axis
pub fn last_step_errors(original: &ArrayView3<'_, f32>, reconstructed: &Array3<f32>) -> Vec<f64> {
    let (batch, seq_len, features) = original.dim();
    let last = seq_len - 1;

    (0..batch)
        .map(|n| {
            let sum: f64 = (0..features)
                .map(|f| {
                    let diff = original[[n, last, f]] as f64 - reconstructed[[n, last, f]] as f64;
                    diff * diff
                })
                .sum();
            sum / features as f64
        })
        .collect()
}

pub fn get_status() -> InferenceStats {
    let sum = LATENCY_SUM_US.load(Ordering::Relaxed);
    let count = INFERENCE_COUNT.load(Ordering::Relaxed);
    let avg = if count > 0 { (sum as f32 / count as f32) / 1000.0 } else { 0.0 };

    InferenceStats {
        avg_latency_ms: avg,
        inference_count: count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_missing_artifact_falls_back_to_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig { window_len: 12, hidden_size: 4, ..Default::default() };

        let loaded = load_model(&dir.path().join("missing.json"), &config).unwrap();

        assert!(!loaded.metadata.is_trained());
        assert_eq!(loaded.metadata.backend, ModelBackend::NativeLstm);

        let input = Array3::<f32>::from_elem((1, 12, 1), 0.5);
        let output = reconstruct_checked(loaded.model.as_ref(), input.view(), 12).unwrap();
        assert_eq!(output.shape(), &[1, 12, 1]);
    }

    #[test]
    fn test_corrupt_artifact_falls_back_to_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let loaded = load_model(&path, &ModelConfig::default()).unwrap();
        match loaded.metadata.source {
            ModelSource::Untrained { reason } => assert!(reason.contains("parse")),
            other => panic!("Expected untrained source, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig { input_size: 3, ..Default::default() };

        let result = load_model(&dir.path().join("missing.json"), &config);
        assert!(matches!(result, Err(ConfigError::UnsupportedInputSize(3))));
    }

    #[test]
    fn test_check_input_rejects_wrong_window() {
        let input = Array3::<f32>::zeros((1, 10, 1));
        assert!(check_input(&input.view(), 10).is_ok());
        assert!(matches!(
            check_input(&input.view(), 12),
            Err(InferenceError::ShapeMismatch { expected: 12, .. })
        ));
    }

    #[test]
    fn test_last_step_errors_ignore_earlier_steps() {
        let original = Array3::<f32>::from_shape_vec((2, 3, 1), vec![0.0, 0.0, 1.0, 5.0, 5.0, 0.5]).unwrap();
        let reconstructed = Array3::<f32>::from_shape_vec((2, 3, 1), vec![9.0, 9.0, 0.5, 0.0, 0.0, 0.5]).unwrap();

        let errors = last_step_errors(&original.view(), &reconstructed);
        assert_eq!(errors, vec![0.25, 0.0]);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(b"weights");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint(b"weights"));
        assert_ne!(a, fingerprint(b"weights2"));
    }
}
