//! Prediction Recorder
//!
//! Turns a score into an immutable prediction record. Ids are allocated as
//! `max + 1` under a lock so concurrent recorders never collide.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::scoring::Score;
use super::store::{DeviceId, PredictionRecord, PredictionStore, StoreError};

pub struct PredictionRecorder {
    predictions: Arc<dyn PredictionStore>,
    model_id: u32,
    write_lock: Mutex<()>,
}

impl PredictionRecorder {
    pub fn new(predictions: Arc<dyn PredictionStore>, model_id: u32) -> Self {
        Self {
            predictions,
            model_id,
            write_lock: Mutex::new(()),
        }
    }

    pub fn try_record(
        &self,
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
        flow: f64,
        score: &Score,
    ) -> Result<PredictionRecord, StoreError> {
        let _guard = self.write_lock.lock();

        let record = PredictionRecord {
            id: self.predictions.next_prediction_id()?,
            device_id,
            timestamp,
            model_id: self.model_id,
            threshold: score.threshold,
            label: score.label,
            confidence: score.confidence,
            reconstruction_error: score.reconstruction_error,
            flow,
        };
        self.predictions.append_prediction(&record)?;
        Ok(record)
    }

    /// Record without retry; failures are logged and dropped
    pub fn record(
        &self,
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
        flow: f64,
        score: &Score,
    ) -> Option<PredictionRecord> {
        match self.try_record(device_id, timestamp, flow, score) {
            Ok(record) => Some(record),
            Err(e) => {
                log::error!("Device {}: failed to record prediction: {}", device_id, e);
                None
            }
        }
    }
}
