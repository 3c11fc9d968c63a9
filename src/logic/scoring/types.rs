use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::DEGRADED_CONFIDENCE;
use crate::logic::model::{CalibrationError, InferenceError, ScalerError};
use crate::logic::store::{PredictionLabel, StoreError};

/// Outcome of scoring one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub label: PredictionLabel,
    pub confidence: f64,
    /// Squared error at the last timestep, in normalized units
    pub reconstruction_error: f64,
    pub threshold: f64,
    pub origin: ScoreOrigin,
}

impl Score {
    /// Conservative response used whenever the model path cannot run
    pub fn degraded(threshold: f64, reason: DegradedReason) -> Self {
        Self {
            label: PredictionLabel::Normal,
            confidence: DEGRADED_CONFIDENCE,
            reconstruction_error: 0.0,
            threshold,
            origin: ScoreOrigin::Degraded(reason),
        }
    }

    pub fn is_anomaly(&self) -> bool {
        self.label == PredictionLabel::Anomaly
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.origin, ScoreOrigin::Degraded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreOrigin {
    Model,
    Degraded(DegradedReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradedReason {
    InsufficientData,
    ModelUnavailable,
    Inference,
    Store,
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("insufficient history: {available} of {required} readings")]
    InsufficientData { available: usize, required: usize },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("inference failed: {0}")]
    Inference(InferenceError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ScoreError {
    pub fn reason(&self) -> DegradedReason {
        match self {
            ScoreError::InsufficientData { .. } => DegradedReason::InsufficientData,
            ScoreError::ModelUnavailable(_) => DegradedReason::ModelUnavailable,
            ScoreError::Inference(_) => DegradedReason::Inference,
            ScoreError::Store(_) => DegradedReason::Store,
        }
    }
}

impl From<InferenceError> for ScoreError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::NotFound(_)
            | InferenceError::InvalidWeights(_)
            | InferenceError::ShapeMismatch { .. } => ScoreError::ModelUnavailable(e.to_string()),
            other => ScoreError::Inference(other),
        }
    }
}

impl From<ScalerError> for ScoreError {
    fn from(e: ScalerError) -> Self {
        ScoreError::Inference(InferenceError::Scaling(e))
    }
}

impl From<CalibrationError> for ScoreError {
    fn from(e: CalibrationError) -> Self {
        match e {
            CalibrationError::Store(e) => ScoreError::Store(e),
            CalibrationError::Scaler(e) => e.into(),
            CalibrationError::Inference(e) => e.into(),
            CalibrationError::InvalidPercentile(_) => {
                ScoreError::Inference(InferenceError::Runtime(e.to_string()))
            }
        }
    }
}
