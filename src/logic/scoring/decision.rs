//! Anomaly decision and confidence rules

use crate::logic::store::PredictionLabel;

/// Error factor is capped at this many thresholds
const MAX_ERROR_FACTOR: f64 = 3.0;
const MIN_THRESHOLD: f64 = 1e-8;
const MIN_FLOW_MAGNITUDE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub label: PredictionLabel,
    pub confidence: f64,
    /// `error > threshold` before the override
    pub exceeds_threshold: bool,
    /// Reconstruction above the observed flow suppressed the flag
    pub suppressed: bool,
    pub error_factor: f64,
    pub flow_diff_ratio: f64,
}

/// Label and confidence for one reconstruction.
///
/// `original` and `reconstructed` are in flow units. A reconstruction above
/// the observed flow always yields Normal, so only excess flow is flagged.
pub fn decide(error: f64, threshold: f64, original: f64, reconstructed: f64) -> Decision {
    let exceeds_threshold = error > threshold;
    let suppressed = reconstructed > original;

    let error_factor = (error / threshold.max(MIN_THRESHOLD)).min(MAX_ERROR_FACTOR);
    let flow_diff_ratio = (reconstructed - original).abs() / original.abs().max(MIN_FLOW_MAGNITUDE);

    let (label, confidence) = if exceeds_threshold && !suppressed {
        let strength = (0.7 * error_factor + 0.3 * flow_diff_ratio).min(1.0);
        (PredictionLabel::Anomaly, (0.60 + 0.35 * strength).min(0.95))
    } else {
        let calm = 1.0 - (error_factor / 2.0).min(1.0);
        (PredictionLabel::Normal, (0.75 + 0.20 * calm).clamp(0.75, 0.95))
    };

    Decision {
        label,
        confidence,
        exceeds_threshold,
        suppressed,
        error_factor,
        flow_diff_ratio,
    }
}
