//! Threshold Calibration
//!
//! Derives a per-device anomaly threshold from the distribution of
//! last-step reconstruction errors over the device's recent history.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_DAYS_BACK, DEFAULT_PERCENTILE};
use crate::logic::context::EngineContext;
use crate::logic::store::{DeviceId, MeasurementQuery, MeasurementStore, StoreError, TimeRange};
use super::inference::{last_step_errors, reconstruct_checked, InferenceError};
use super::scaler::{MinMaxScaler, ScalerError};

/// Windows reconstructed per model call
const CALIBRATION_BATCH: usize = 64;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("percentile must lie in [0, 100], got {0}")]
    InvalidPercentile(f64),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("scaling failed: {0}")]
    Scaler(#[from] ScalerError),

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
}

/// Validated calibration parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    days_back: u32,
    percentile: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            days_back: DEFAULT_DAYS_BACK,
            percentile: DEFAULT_PERCENTILE,
        }
    }
}

impl CalibrationParams {
    pub fn new(days_back: u32, percentile: f64) -> Result<Self, CalibrationError> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(CalibrationError::InvalidPercentile(percentile));
        }
        Ok(Self { days_back, percentile })
    }

    pub fn days_back(&self) -> u32 {
        self.days_back
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdSource {
    /// Percentile of windowed reconstruction errors
    Percentile,
    /// Not enough history, fallback constant
    Fallback,
}

/// Summary of the windowed error distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl ErrorStats {
    fn from_errors(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;
        let var = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            min: errors.iter().copied().fold(f64::INFINITY, f64::min),
            max: errors.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std: var.sqrt(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub threshold: f64,
    pub source: ThresholdSource,
    /// Measurements the threshold was derived from
    pub samples: usize,
    pub windows: usize,
    pub stats: Option<ErrorStats>,
}

#[derive(Clone)]
pub struct ThresholdCalibrator {
    ctx: EngineContext,
    measurements: Arc<dyn MeasurementStore>,
}

impl ThresholdCalibrator {
    pub fn new(ctx: EngineContext, measurements: Arc<dyn MeasurementStore>) -> Self {
        Self { ctx, measurements }
    }

    pub fn calibrate(&self, device_id: DeviceId, params: CalibrationParams) -> Result<Calibration, CalibrationError> {
        self.calibrate_at(device_id, params, Utc::now())
    }

    /// Calibrate against the window `[now - days_back, now]`
    pub fn calibrate_at(
        &self,
        device_id: DeviceId,
        params: CalibrationParams,
        now: DateTime<Utc>,
    ) -> Result<Calibration, CalibrationError> {
        let window_len = self.ctx.window_len();
        let start = now - Duration::days(i64::from(params.days_back));

        let mut rows = self.measurements.query_measurements(
            device_id,
            &MeasurementQuery::ascending().within(Some(TimeRange::between(start, now))),
        )?;

        if rows.len() < 2 * window_len {
            log::debug!(
                "Device {}: {} readings in the last {} days, using full history",
                device_id, rows.len(), params.days_back
            );
            rows = self
                .measurements
                .query_measurements(device_id, &MeasurementQuery::ascending())?;
        }

        if rows.len() < window_len {
            log::info!(
                "Device {}: {} readings, need {} to calibrate; using fallback threshold",
                device_id, rows.len(), window_len
            );
            return Ok(self.fallback(rows.len()));
        }

        let flows: Vec<f64> = rows.iter().map(|m| m.flow).collect();
        let scaler = MinMaxScaler::fit(&flows)?;
        log::debug!(
            "Device {}: fitted scaler over {} readings (min {:.3}, max {:.3})",
            device_id, flows.len(), scaler.min(), scaler.max()
        );
        let scaled = scaler.transform(&flows)?;

        let errors = self.window_errors(&scaled)?;
        let Some(threshold) = percentile(&errors, params.percentile) else {
            return Ok(self.fallback(rows.len()));
        };
        let stats = ErrorStats::from_errors(&errors);

        if let Some(s) = &stats {
            log::info!(
                "Device {}: calibrated p{} threshold {:.6} over {} windows (min {:.6}, max {:.6}, mean {:.6}, std {:.6})",
                device_id, params.percentile, threshold, errors.len(), s.min, s.max, s.mean, s.std
            );
        }

        Ok(Calibration {
            threshold,
            source: ThresholdSource::Percentile,
            samples: rows.len(),
            windows: errors.len(),
            stats,
        })
    }

    fn fallback(&self, samples: usize) -> Calibration {
        Calibration {
            threshold: self.ctx.fallback_threshold(),
            source: ThresholdSource::Fallback,
            samples,
            windows: 0,
            stats: None,
        }
    }

    /// Last-step error of every stride-1 window over `scaled`
    fn window_errors(&self, scaled: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let window_len = self.ctx.window_len();
        let total = scaled.len() + 1 - window_len;
        let mut errors = Vec::with_capacity(total);

        for first in (0..total).step_by(CALIBRATION_BATCH) {
            let count = CALIBRATION_BATCH.min(total - first);
            let batch = Array3::from_shape_fn((count, window_len, 1), |(n, t, _)| {
                scaled[first + n + t] as f32
            });
            let reconstructed = reconstruct_checked(self.ctx.model(), batch.view(), window_len)?;
            errors.extend(last_step_errors(&batch.view(), &reconstructed));
        }

        Ok(errors)
    }
}

/// `p`-th percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;

    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
