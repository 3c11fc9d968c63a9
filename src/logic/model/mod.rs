//! Model Module - Reconstruction model, scaling and threshold calibration
//!
//! Inference is kept apart from storage so the backend can be swapped
//! (native weights, ONNX export, test doubles) without touching scoring.

pub mod inference;
pub mod lstm;
pub mod onnx;
pub mod scaler;
pub mod threshold;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types
pub use inference::{
    load_model, reconstruct_checked, InferenceError, LoadedModel, ModelBackend, ModelMetadata,
    ModelSource, ReconstructionModel,
};
pub use lstm::LstmAutoencoder;
pub use scaler::{MinMaxScaler, ScalerError};
pub use threshold::{Calibration, CalibrationError, CalibrationParams, ThresholdCalibrator, ThresholdSource};
