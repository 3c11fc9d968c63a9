//! Native LSTM Autoencoder
//!
//! Encoder LSTM stack -> last hidden state repeated W times -> decoder LSTM
//! stack -> linear head (optional sigmoid). Gate layout follows the usual
//! (input, forget, cell, output) ordering of exported PyTorch state dicts.
//! Dropout is a training-time concern and is not applied here.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::logic::config::ModelConfig;
use super::inference::{InferenceError, ModelBackend, ReconstructionModel};

// ============================================================================
// PERSISTED WEIGHTS
// ============================================================================

/// One LSTM layer as stored on disk (row-major matrices)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayerWeights {
    /// `[4H][input]`
    pub w_ih: Vec<Vec<f32>>,
    /// `[4H][H]`
    pub w_hh: Vec<Vec<f32>>,
    pub b_ih: Vec<f32>,
    pub b_hh: Vec<f32>,
}

/// Full autoencoder artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoencoderWeights {
    pub encoder: Vec<LstmLayerWeights>,
    pub decoder: Vec<LstmLayerWeights>,
    /// `[H]`
    pub output_weight: Vec<f32>,
    pub output_bias: f32,
}

// ============================================================================
// RUNTIME LAYERS
// ============================================================================

#[derive(Debug, Clone)]
struct LstmLayer {
    w_ih: Array2<f32>,
    w_hh: Array2<f32>,
    bias: Array1<f32>,
    hidden: usize,
}

impl LstmLayer {
    fn from_weights(w: &LstmLayerWeights, input: usize, hidden: usize) -> Result<Self, InferenceError> {
        let w_ih = to_matrix(&w.w_ih, 4 * hidden, input, "w_ih")?;
        let w_hh = to_matrix(&w.w_hh, 4 * hidden, hidden, "w_hh")?;

        if w.b_ih.len() != 4 * hidden || w.b_hh.len() != 4 * hidden {
            return Err(InferenceError::InvalidWeights(format!(
                "bias length must be {}, got {} / {}",
                4 * hidden,
                w.b_ih.len(),
                w.b_hh.len()
            )));
        }
        let bias = Array1::from_vec(w.b_ih.clone()) + Array1::from_vec(w.b_hh.clone());

        Ok(Self { w_ih, w_hh, bias, hidden })
    }

    fn random<R: Rng>(input: usize, hidden: usize, rng: &mut R) -> Self {
        let k = 1.0 / (hidden as f32).sqrt();
        let w_ih = Array2::from_shape_fn((4 * hidden, input), |_| rng.gen_range(-k..k));
        let w_hh = Array2::from_shape_fn((4 * hidden, hidden), |_| rng.gen_range(-k..k));
        let bias = Array1::from_shape_fn(4 * hidden, |_| rng.gen_range(-k..k) + rng.gen_range(-k..k));
        Self { w_ih, w_hh, bias, hidden }
    }

    fn to_weights(&self) -> LstmLayerWeights {
        LstmLayerWeights {
            w_ih: self.w_ih.rows().into_iter().map(|r| r.to_vec()).collect(),
            w_hh: self.w_hh.rows().into_iter().map(|r| r.to_vec()).collect(),
            b_ih: self.bias.to_vec(),
            b_hh: vec![0.0; self.bias.len()],
        }
    }

    /// One timestep; returns the new (h, c)
    fn step(&self, x: ArrayView1<'_, f32>, h: &Array1<f32>, c: &Array1<f32>) -> (Array1<f32>, Array1<f32>) {
        let hd = self.hidden;
        let gates = self.w_ih.dot(&x) + self.w_hh.dot(h) + &self.bias;

        let i = gates.slice(s![0..hd]).mapv(sigmoid);
        let f = gates.slice(s![hd..2 * hd]).mapv(sigmoid);
        let g = gates.slice(s![2 * hd..3 * hd]).mapv(f32::tanh);
        let o = gates.slice(s![3 * hd..4 * hd]).mapv(sigmoid);

        let c_next = &f * c + &i * &g;
        let h_next = &o * &c_next.mapv(f32::tanh);
        (h_next, c_next)
    }

    /// Run over a whole sequence `[T][input]`, returning `[T][H]`
    fn run(&self, inputs: &Array2<f32>) -> Array2<f32> {
        let steps = inputs.nrows();
        let mut h = Array1::<f32>::zeros(self.hidden);
        let mut c = Array1::<f32>::zeros(self.hidden);
        let mut outputs = Array2::<f32>::zeros((steps, self.hidden));

        for t in 0..steps {
            let (h_next, c_next) = self.step(inputs.row(t), &h, &c);
            outputs.row_mut(t).assign(&h_next);
            h = h_next;
            c = c_next;
        }
        outputs
    }
}

// ============================================================================
// AUTOENCODER
// ============================================================================

#[derive(Debug, Clone)]
pub struct LstmAutoencoder {
    encoder: Vec<LstmLayer>,
    decoder: Vec<LstmLayer>,
    output_weight: Array1<f32>,
    output_bias: f32,
    use_act: bool,
}

impl LstmAutoencoder {
    /// Build from persisted weights, checking every shape against `config`
    pub fn from_weights(weights: &AutoencoderWeights, config: &ModelConfig) -> Result<Self, InferenceError> {
        let hidden = config.hidden_size;

        if weights.encoder.len() != config.num_layers || weights.decoder.len() != config.num_layers {
            return Err(InferenceError::InvalidWeights(format!(
                "expected {} encoder/decoder layers, got {} / {}",
                config.num_layers,
                weights.encoder.len(),
                weights.decoder.len()
            )));
        }
        if weights.output_weight.len() != hidden {
            return Err(InferenceError::InvalidWeights(format!(
                "output weight length must be {}, got {}",
                hidden,
                weights.output_weight.len()
            )));
        }

        let encoder = weights
            .encoder
            .iter()
            .enumerate()
            .map(|(i, w)| LstmLayer::from_weights(w, if i == 0 { config.input_size } else { hidden }, hidden))
            .collect::<Result<Vec<_>, _>>()?;
        let decoder = weights
            .decoder
            .iter()
            .map(|w| LstmLayer::from_weights(w, hidden, hidden))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            encoder,
            decoder,
            output_weight: Array1::from_vec(weights.output_weight.clone()),
            output_bias: weights.output_bias,
            use_act: config.use_act,
        })
    }

    /// Parse a JSON weights artifact
    pub fn from_json(bytes: &[u8], config: &ModelConfig) -> Result<Self, InferenceError> {
        let weights: AutoencoderWeights = serde_json::from_slice(bytes)?;
        Self::from_weights(&weights, config)
    }

    /// Untrained weights, uniform in `[-1/sqrt(H), 1/sqrt(H)]`
    pub fn random<R: Rng>(config: &ModelConfig, rng: &mut R) -> Self {
        let hidden = config.hidden_size;
        let encoder = (0..config.num_layers)
            .map(|i| LstmLayer::random(if i == 0 { config.input_size } else { hidden }, hidden, rng))
            .collect();
        let decoder = (0..config.num_layers)
            .map(|_| LstmLayer::random(hidden, hidden, rng))
            .collect();

        let k = 1.0 / (hidden as f32).sqrt();
        Self {
            encoder,
            decoder,
            output_weight: Array1::from_shape_fn(hidden, |_| rng.gen_range(-k..k)),
            output_bias: rng.gen_range(-k..k),
            use_act: config.use_act,
        }
    }

    pub fn to_weights(&self) -> AutoencoderWeights {
        AutoencoderWeights {
            encoder: self.encoder.iter().map(LstmLayer::to_weights).collect(),
            decoder: self.decoder.iter().map(LstmLayer::to_weights).collect(),
            output_weight: self.output_weight.to_vec(),
            output_bias: self.output_bias,
        }
    }

    /// Reconstruct one sequence `[T][1]`
    fn forward(&self, sequence: ArrayView1<'_, f32>) -> Array1<f32> {
        let steps = sequence.len();

        let mut hidden_seq = Array2::from_shape_fn((steps, 1), |(t, _)| sequence[t]);
        for layer in &self.encoder {
            hidden_seq = layer.run(&hidden_seq);
        }

        let latent = hidden_seq.row(steps - 1).to_owned();
        let mut decoded = Array2::from_shape_fn((steps, latent.len()), |(_, j)| latent[j]);
        for layer in &self.decoder {
            decoded = layer.run(&decoded);
        }

        decoded
            .rows()
            .into_iter()
            .map(|h| {
                let y = h.dot(&self.output_weight) + self.output_bias;
                if self.use_act { sigmoid(y) } else { y }
            })
            .collect()
    }
}

impl ReconstructionModel for LstmAutoencoder {
    fn backend(&self) -> ModelBackend {
        ModelBackend::NativeLstm
    }

    fn reconstruct(&self, batch: ArrayView3<'_, f32>) -> Result<Array3<f32>, InferenceError> {
        let (n, steps, features) = batch.dim();
        if steps == 0 || features != 1 {
            return Err(InferenceError::ShapeMismatch {
                expected: steps,
                actual: batch.shape().to_vec(),
            });
        }
        let input_size = self.encoder.first().map_or(0, |layer| layer.w_ih.ncols());
        if input_size != features {
            return Err(InferenceError::InvalidWeights(format!(
                "encoder expects input size {}, got {}",
                input_size, features
            )));
        }
        let mut output = Array3::<f32>::zeros((n, steps, 1));

        for i in 0..n {
            let reconstructed = self.forward(batch.slice(s![i, .., 0]));
            output.slice_mut(s![i, .., 0]).assign(&reconstructed);
        }
        Ok(output)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn to_matrix(rows: &[Vec<f32>], n_rows: usize, n_cols: usize, name: &str) -> Result<Array2<f32>, InferenceError> {
    if rows.len() != n_rows || rows.iter().any(|r| r.len() != n_cols) {
        return Err(InferenceError::InvalidWeights(format!(
            "{} must be {}x{}",
            name, n_rows, n_cols
        )));
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((n_rows, n_cols), flat)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> ModelConfig {
        ModelConfig {
            hidden_size: 6,
            window_len: 16,
            ..Default::default()
        }
    }

    #[test]
    fn test_multivariate_weights_are_rejected() {
        let config = ModelConfig { input_size: 3, ..small_config() };
        let model = LstmAutoencoder::random(&config, &mut StdRng::seed_from_u64(3));

        let input = Array3::<f32>::zeros((1, 16, 1));
        assert!(matches!(model.reconstruct(input.view()), Err(InferenceError::InvalidWeights(_))));

        let config = ModelConfig { num_layers: 0, ..small_config() };
        let model = LstmAutoencoder::random(&config, &mut StdRng::seed_from_u64(3));
        assert!(matches!(model.reconstruct(input.view()), Err(InferenceError::InvalidWeights(_))));
    }

    #[test]
    fn test_reconstruct_keeps_shape_and_range() {
        let config = small_config();
        let model = LstmAutoencoder::random(&config, &mut StdRng::seed_from_u64(7));

        let input = Array3::<f32>::from_shape_fn((3, 16, 1), |(n, t, _)| (n + t) as f32 / 20.0);
        let output = model.reconstruct(input.view()).unwrap();

        assert_eq!(output.shape(), &[3, 16, 1]);
        // Sigmoid head keeps everything in (0, 1)
        assert!(output.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_forward_is_deterministic() {
        let config = small_config();
        let model = LstmAutoencoder::random(&config, &mut StdRng::seed_from_u64(11));
        let input = Array3::<f32>::from_elem((1, 16, 1), 0.3);

        let a = model.reconstruct(input.view()).unwrap();
        let b = model.reconstruct(input.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_weights_json_round_trip_preserves_output() {
        let config = ModelConfig { num_layers: 2, use_act: false, ..small_config() };
        let model = LstmAutoencoder::random(&config, &mut StdRng::seed_from_u64(3));

        let json = serde_json::to_vec(&model.to_weights()).unwrap();
        let restored = LstmAutoencoder::from_json(&json, &config).unwrap();

        let input = Array3::<f32>::from_shape_fn((1, 16, 1), |(_, t, _)| (t as f32).sin());
        let a = model.reconstruct(input.view()).unwrap();
        let b = restored.reconstruct(input.view()).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rejects_mismatched_hidden_size() {
        let model = LstmAutoencoder::random(&small_config(), &mut StdRng::seed_from_u64(1));
        let weights = model.to_weights();

        let wider = ModelConfig { hidden_size: 8, ..small_config() };
        assert!(matches!(
            LstmAutoencoder::from_weights(&weights, &wider),
            Err(InferenceError::InvalidWeights(_))
        ));
    }
}
