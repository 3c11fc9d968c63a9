//! ONNX Runtime backend
//!
//! For autoencoders exported to ONNX. Input `(batch, W, 1)` float tensor,
//! first graph output is taken as the reconstruction.

use ndarray::{Array3, ArrayView3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;

use super::inference::{InferenceError, ModelBackend, ReconstructionModel};

pub struct OnnxReconstructor {
    // Session::run needs &mut; forward passes are otherwise stateless
    session: Mutex<Session>,
    output_name: String,
    window_len: usize,
}

impl OnnxReconstructor {
    /// Load an ONNX graph from bytes
    pub fn from_bytes(model_bytes: &[u8], window_len: usize) -> Result<Self, InferenceError> {
        log::info!("Loading ONNX model from memory ({} bytes)", model_bytes.len());

        let session = Session::builder()
            .map_err(|e| InferenceError::Runtime(format!("Session builder error: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError::Runtime(format!("Optimization error: {}", e)))?
            .commit_from_memory(model_bytes)
            .map_err(|e| InferenceError::Runtime(format!("Load from memory error: {}", e)))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| InferenceError::Runtime("No output defined".to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            window_len,
        })
    }
}

impl ReconstructionModel for OnnxReconstructor {
    fn backend(&self) -> ModelBackend {
        ModelBackend::Onnx
    }

    fn reconstruct(&self, batch: ArrayView3<'_, f32>) -> Result<Array3<f32>, InferenceError> {
        let dim = batch.dim();
        if dim.1 != self.window_len {
            return Err(InferenceError::ShapeMismatch {
                expected: self.window_len,
                actual: batch.shape().to_vec(),
            });
        }

        let input_tensor = Value::from_array(batch.to_owned())
            .map_err(|e| InferenceError::Runtime(format!("Tensor error: {}", e)))?;

        let data: Vec<f32> = {
            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![input_tensor])
                .map_err(|e| InferenceError::Runtime(format!("Inference failed: {}", e)))?;

            let output = outputs
                .get(&self.output_name)
                .ok_or_else(|| InferenceError::Runtime("No output".to_string()))?;

            let (_, values) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Runtime(format!("Extract error: {}", e)))?;
            values.to_vec()
        };

        Ok(Array3::from_shape_vec(dim, data)?)
    }
}
