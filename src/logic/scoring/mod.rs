//! Scoring Module - Online anomaly decision for one reading
//!
//! Builds the window ending at the new reading, normalizes it with a scaler
//! fit for this call only, reconstructs it and labels the last step against
//! the device threshold. Failures never reach the caller: every
//! `ScoreError` maps to the degraded Normal response.

mod decision;
mod threshold_cache;
mod types;


use std::sync::Arc;

use ndarray::Array3;

use crate::constants::{NORMALIZATION_HISTORY_LIMIT, NORMALIZATION_MIN_HISTORY};
use crate::logic::context::EngineContext;
use crate::logic::model::inference::last_step_errors;
use crate::logic::model::{reconstruct_checked, MinMaxScaler};
use crate::logic::store::{DeviceId, MeasurementQuery, MeasurementStore, Stores};

pub use decision::{decide, Decision};
pub use threshold_cache::ThresholdCache;
pub use types::{DegradedReason, Score, ScoreError, ScoreOrigin};

pub struct AnomalyScorer {
    ctx: EngineContext,
    measurements: Arc<dyn MeasurementStore>,
    thresholds: Arc<ThresholdCache>,
}

impl AnomalyScorer {
    pub fn new(ctx: EngineContext, stores: &Stores) -> Self {
        Self {
            thresholds: Arc::new(ThresholdCache::new(ctx.clone(), stores)),
            measurements: stores.measurements.clone(),
            ctx,
        }
    }

    pub fn thresholds(&self) -> &Arc<ThresholdCache> {
        &self.thresholds
    }

    /// Score `flow` as the newest value after the device's latest `W-1` readings
    pub fn score(&self, device_id: DeviceId, flow: f64) -> Score {
        match self.try_score(device_id, flow) {
            Ok(score) => score,
            Err(ScoreError::InsufficientData { available, required }) => {
                log::debug!(
                    "Device {}: {} of {} readings, returning default score",
                    device_id, available, required
                );
                Score::degraded(
                    self.thresholds.cached_or_calibrated(device_id),
                    DegradedReason::InsufficientData,
                )
            }
            Err(e) => {
                log::warn!("Device {}: scoring degraded ({})", device_id, e);
                Score::degraded(self.thresholds.cached_or_fallback(device_id), e.reason())
            }
        }
    }

    /// Model path without the degraded mapping
    pub fn try_score(&self, device_id: DeviceId, flow: f64) -> Result<Score, ScoreError> {
        let window_len = self.ctx.window_len();
        let needed = window_len - 1;

        // One query serves both the window and the normalization reference
        let history = self.measurements.query_measurements(
            device_id,
            &MeasurementQuery::descending().limit(NORMALIZATION_HISTORY_LIMIT.max(needed)),
        )?;

        if history.len() < needed {
            return Err(ScoreError::InsufficientData {
                available: history.len(),
                required: needed,
            });
        }

        let mut window: Vec<f64> = history[..needed].iter().rev().map(|m| m.flow).collect();
        window.push(flow);

        let scaler = if history.len() >= NORMALIZATION_MIN_HISTORY {
            let reference: Vec<f64> = history
                .iter()
                .take(NORMALIZATION_HISTORY_LIMIT)
                .map(|m| m.flow)
                .collect();
            MinMaxScaler::fit(&reference)?
        } else {
            MinMaxScaler::fit(&window)?
        };

        let scaled = scaler.transform(&window)?;
        let batch = Array3::from_shape_fn((1, window_len, 1), |(_, t, _)| scaled[t] as f32);
        let reconstructed = reconstruct_checked(self.ctx.model(), batch.view(), window_len)?;

        let error = last_step_errors(&batch.view(), &reconstructed)
            .first()
            .copied()
            .unwrap_or_default();
        let reconstructed_flow = scaler.inverse_value(f64::from(reconstructed[[0, window_len - 1, 0]]))?;

        let threshold = self.thresholds.resolve(device_id)?;
        let decision = decide(error, threshold, flow, reconstructed_flow);

        log::debug!(
            "Device {}: flow {:.3} reconstructed {:.3} error {:.6} threshold {:.6} factor {:.3} ratio {:.3} -> {} ({:.2})",
            device_id,
            flow,
            reconstructed_flow,
            error,
            threshold,
            decision.error_factor,
            decision.flow_diff_ratio,
            decision.label,
            decision.confidence
        );

        Ok(Score {
            label: decision.label,
            confidence: decision.confidence,
            reconstruction_error: error,
            threshold,
            origin: ScoreOrigin::Model,
        })
    }
}
