//! Min-Max Scaler
//!
//! Fit on a reference batch, then applied to a query batch.
//! Each call builds its own instance; nothing is shared between scorings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScalerError {
    #[error("cannot fit scaler on an empty batch")]
    EmptyBatch,
    #[error("non-finite value {0} in scaler input")]
    NonFinite(f64),
}

/// Fitted (min, max) range.
///
/// Values outside the fitted range are not clipped. A constant batch
/// (`min == max`) uses unit scale, so every fitted value maps to 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: f64,
    max: f64,
}

impl MinMaxScaler {
    /// Compute (min, max) over `batch`
    pub fn fit(batch: &[f64]) -> Result<Self, ScalerError> {
        if batch.is_empty() {
            return Err(ScalerError::EmptyBatch);
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in batch {
            if !v.is_finite() {
                return Err(ScalerError::NonFinite(v));
            }
            min = min.min(v);
            max = max.max(v);
        }

        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn is_degenerate(&self) -> bool {
        self.max - self.min <= 0.0
    }

    fn range(&self) -> f64 {
        if self.is_degenerate() {
            1.0
        } else {
            self.max - self.min
        }
    }

    pub fn transform_value(&self, v: f64) -> Result<f64, ScalerError> {
        if !v.is_finite() {
            return Err(ScalerError::NonFinite(v));
        }
        Ok((v - self.min) / self.range())
    }

    pub fn inverse_value(&self, scaled: f64) -> Result<f64, ScalerError> {
        if !scaled.is_finite() {
            return Err(ScalerError::NonFinite(scaled));
        }
        Ok(scaled * self.range() + self.min)
    }

    pub fn transform(&self, batch: &[f64]) -> Result<Vec<f64>, ScalerError> {
        batch.iter().map(|&v| self.transform_value(v)).collect()
    }

    pub fn inverse_transform(&self, scaled: &[f64]) -> Result<Vec<f64>, ScalerError> {
        scaled.iter().map(|&s| self.inverse_value(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fit_transform_unit_range() {
        let scaler = MinMaxScaler::fit(&[10.0, 20.0, 15.0, 30.0]).unwrap();
        let scaled = scaler.transform(&[10.0, 20.0, 30.0]).unwrap();

        assert_relative_eq!(scaled[0], 0.0);
        assert_relative_eq!(scaled[1], 0.5);
        assert_relative_eq!(scaled[2], 1.0);
    }

    #[test]
    fn test_round_trip() {
        let batch = [93.2, 101.7, 99.9, 105.4, 96.0, 100.0];
        let scaler = MinMaxScaler::fit(&batch).unwrap();

        let scaled = scaler.transform(&batch).unwrap();
        let restored = scaler.inverse_transform(&scaled).unwrap();

        for (a, b) in batch.iter().zip(restored.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_degenerate_batch_maps_to_zero() {
        let batch = [100.0; 8];
        let scaler = MinMaxScaler::fit(&batch).unwrap();
        assert!(scaler.is_degenerate());

        let scaled = scaler.transform(&batch).unwrap();
        assert!(scaled.iter().all(|&v| v == 0.0));

        let restored = scaler.inverse_transform(&scaled).unwrap();
        assert!(restored.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn test_query_outside_fit_is_not_clipped() {
        let scaler = MinMaxScaler::fit(&[0.0, 10.0]).unwrap();
        assert_relative_eq!(scaler.transform_value(50.0).unwrap(), 5.0);
        assert_relative_eq!(scaler.transform_value(-10.0).unwrap(), -1.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(MinMaxScaler::fit(&[]), Err(ScalerError::EmptyBatch));
        assert!(matches!(
            MinMaxScaler::fit(&[1.0, f64::NAN]),
            Err(ScalerError::NonFinite(_))
        ));

        let scaler = MinMaxScaler::fit(&[0.0, 1.0]).unwrap();
        assert!(scaler.inverse_value(f64::INFINITY).is_err());
    }
}
