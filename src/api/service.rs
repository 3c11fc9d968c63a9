//! Detection Service - calls exposed to the CRUD layer
//!
//! Wires the context, stores, scorer, recorder and worker pool together.
//! Scoring never fails from the caller's point of view; only calibration
//! and the live ingest path return errors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::APP_VERSION;
use crate::logic::batch::{run_batch, BatchReport};
use crate::logic::context::EngineContext;
use crate::logic::model::{CalibrationError, CalibrationParams, ModelMetadata};
use crate::logic::pipeline::ScoringPipeline;
use crate::logic::recorder::PredictionRecorder;
use crate::logic::scoring::{AnomalyScorer, Score};
use crate::logic::store::{DeviceId, Measurement, PredictionLabel, StoreError, Stores};
use crate::logic::worker::{ScoringPool, ScoringTicket, SubmitError};
use super::engine_status::{EngineStatus, ModelStatus};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("calibration failed: {0}")]
    Calibration(CalibrationError),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DeviceNotFound(id) => ServiceError::DeviceNotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

impl From<CalibrationError> for ServiceError {
    fn from(e: CalibrationError) -> Self {
        match e {
            CalibrationError::InvalidPercentile(_) => ServiceError::InvalidParameters(e.to_string()),
            CalibrationError::Store(e) => e.into(),
            other => ServiceError::Calibration(other),
        }
    }
}

/// One row of the all-devices status listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub name: Option<String>,
    pub label: PredictionLabel,
    /// Timestamp of the prediction the label comes from
    pub last_prediction_at: Option<DateTime<Utc>>,
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct DetectionService {
    ctx: EngineContext,
    stores: Stores,
    pipeline: ScoringPipeline,
    pool: ScoringPool,
    metadata: Option<ModelMetadata>,
}

impl DetectionService {
    /// Build the service and start its scoring pool.
    /// Must be called from within a tokio runtime.
    pub fn new(ctx: EngineContext, stores: Stores) -> Self {
        let scorer = Arc::new(AnomalyScorer::new(ctx.clone(), &stores));
        let recorder = Arc::new(PredictionRecorder::new(
            stores.predictions.clone(),
            ctx.config().model_id,
        ));
        let pipeline = ScoringPipeline::new(scorer, recorder);
        let pool = ScoringPool::start(pipeline.clone(), ctx.config().pool);

        Self {
            ctx,
            stores,
            pipeline,
            pool,
            metadata: None,
        }
    }

    /// Attach the provenance of the loaded model for status reporting
    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Recalibrate a device threshold and persist it
    pub fn calibrate_threshold(
        &self,
        device_id: DeviceId,
        days_back: u32,
        percentile: f64,
    ) -> Result<f64, ServiceError> {
        let params = CalibrationParams::new(days_back, percentile)?;
        if self.stores.devices.get_device(device_id)?.is_none() {
            return Err(ServiceError::DeviceNotFound(device_id));
        }

        let calibration = self.pipeline.scorer().thresholds().recalibrate(device_id, params)?;
        log::info!(
            "Device {}: threshold recalculated to {:.6} ({} days, p{})",
            device_id, calibration.threshold, days_back, percentile
        );
        Ok(calibration.threshold)
    }

    /// Score a value against the device's stored history
    pub fn score(&self, device_id: DeviceId, flow: f64) -> Score {
        self.pipeline.scorer().score(device_id, flow)
    }

    /// Store a measurement and queue it for scoring.
    ///
    /// Returns once the measurement is stored. The ticket resolves when the
    /// prediction has been recorded and may be dropped.
    pub fn record_measurement_and_score(&self, measurement: Measurement) -> Result<ScoringTicket, ServiceError> {
        if !measurement.flow.is_finite() {
            return Err(ServiceError::InvalidParameters(format!(
                "flow must be finite, got {}",
                measurement.flow
            )));
        }

        self.stores.measurements.append_measurement(&measurement)?;
        Ok(self.pool.submit(measurement)?)
    }

    /// Label of the latest prediction, Normal when there is none
    pub fn device_status(&self, device_id: DeviceId) -> Result<PredictionLabel, ServiceError> {
        if self.stores.devices.get_device(device_id)?.is_none() {
            return Err(ServiceError::DeviceNotFound(device_id));
        }

        let latest = self.stores.predictions.latest_predictions(device_id, 1)?;
        Ok(latest.first().map_or(PredictionLabel::Normal, |p| p.label))
    }

    /// Latest label of every device, Normal for devices never scored
    pub fn all_device_status(&self) -> Result<Vec<DeviceStatus>, ServiceError> {
        let devices = self.stores.devices.list_devices()?;
        let mut statuses = Vec::with_capacity(devices.len());

        for device in devices {
            let latest = self.stores.predictions.latest_predictions(device.id, 1)?;
            let latest = latest.first();
            statuses.push(DeviceStatus {
                device_id: device.id,
                name: device.name,
                label: latest.map_or(PredictionLabel::Normal, |p| p.label),
                last_prediction_at: latest.map(|p| p.timestamp),
            });
        }
        Ok(statuses)
    }

    /// Calibrate every device and backfill recent predictions. Blocking.
    pub fn run_batch(&self) -> Result<BatchReport, ServiceError> {
        let report = run_batch(
            &self.pipeline,
            &self.stores,
            CalibrationParams::default(),
            self.ctx.config().backfill_count,
        )?;
        Ok(report)
    }

    pub fn engine_status(&self) -> EngineStatus {
        EngineStatus {
            version: APP_VERSION.to_string(),
            window_len: self.ctx.window_len(),
            model: ModelStatus::new(self.ctx.model().backend(), self.metadata.as_ref()),
            inference: crate::logic::model::inference::get_status(),
            pool: self.pool.status(),
        }
    }

    /// Stop accepting live jobs and wait for queued ones
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::testing::{context, MeanModel};
    use crate::logic::model::ModelBackend;
    use crate::logic::scoring::ScoreOrigin;
    use crate::logic::store::{Device, DeviceStore, MeasurementStore, MemoryStore};
    use chrono::{Duration, Utc};

    const W: usize = 8;

    fn service_with(count: usize) -> (Arc<MemoryStore>, DetectionService) {
        let store = Arc::new(MemoryStore::new());
        store.insert_device(Device::new(1).with_name("Block A"));
        let start = Utc::now() - Duration::hours(count as i64 + 1);
        for i in 0..count {
            let flow = 20.0 + (i % 6) as f64;
            store
                .append_measurement(&Measurement::new(1, start + Duration::hours(i as i64), flow))
                .unwrap();
        }

        let service = DetectionService::new(context(Arc::new(MeanModel), W), Stores::shared(store.clone()));
        (store, service)
    }

    #[tokio::test]
    async fn test_calibrate_threshold_persists() {
        let (store, service) = service_with(60);

        let threshold = service.calibrate_threshold(1, 7, 90.0).unwrap();
        assert!(threshold >= 0.0);
        assert_eq!(store.get_device(1).unwrap().unwrap().threshold, Some(threshold));

        let lower = service.calibrate_threshold(1, 7, 10.0).unwrap();
        assert!(lower <= threshold);
    }

    #[tokio::test]
    async fn test_calibrate_threshold_rejects_bad_input() {
        let (_store, service) = service_with(60);

        assert!(matches!(
            service.calibrate_threshold(1, 7, 101.0),
            Err(ServiceError::InvalidParameters(_))
        ));
        assert!(matches!(
            service.calibrate_threshold(1, 7, f64::NAN),
            Err(ServiceError::InvalidParameters(_))
        ));
        assert!(matches!(
            service.calibrate_threshold(5, 7, 90.0),
            Err(ServiceError::DeviceNotFound(5))
        ));
    }

    #[tokio::test]
    async fn test_live_path_records_prediction() {
        let (store, service) = service_with(60);
        assert_eq!(service.device_status(1).unwrap(), PredictionLabel::Normal);

        let ticket = service
            .record_measurement_and_score(Measurement::new(1, Utc::now(), 400.0))
            .unwrap();
        let outcome = ticket.wait().await.unwrap();

        assert_eq!(outcome.score.origin, ScoreOrigin::Model);
        assert_eq!(outcome.score.label, PredictionLabel::Anomaly);
        let record = outcome.record.unwrap();
        assert_eq!(record.flow, 400.0);
        assert_eq!(record.model_id, 1);
        assert_eq!(service.device_status(1).unwrap(), PredictionLabel::Anomaly);

        // Measurement is stored, threshold got filled on miss
        let device = store.get_device(1).unwrap().unwrap();
        assert_eq!(device.threshold, Some(record.threshold));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_all_device_status_lists_every_device() {
        let (store, service) = service_with(60);
        store.insert_device(Device::new(2).with_name("Block B"));

        let ticket = service
            .record_measurement_and_score(Measurement::new(1, Utc::now(), 400.0))
            .unwrap();
        let record = ticket.wait().await.unwrap().record.unwrap();

        let mut statuses = service.all_device_status().unwrap();
        statuses.sort_by_key(|s| s.device_id);

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name.as_deref(), Some("Block A"));
        assert_eq!(statuses[0].label, PredictionLabel::Anomaly);
        assert_eq!(statuses[0].last_prediction_at, Some(record.timestamp));
        assert_eq!(
            statuses[1],
            DeviceStatus {
                device_id: 2,
                name: Some("Block B".to_string()),
                label: PredictionLabel::Normal,
                last_prediction_at: None,
            }
        );
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_live_path_rejects_unknown_device() {
        let (_store, service) = service_with(0);

        let result = service.record_measurement_and_score(Measurement::new(9, Utc::now(), 1.0));
        assert!(matches!(result, Err(ServiceError::DeviceNotFound(9))));
        assert!(matches!(service.device_status(9), Err(ServiceError::DeviceNotFound(9))));

        let result = service.record_measurement_and_score(Measurement::new(1, Utc::now(), f64::INFINITY));
        assert!(matches!(result, Err(ServiceError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_live_path_after_shutdown() {
        let (store, service) = service_with(10);
        service.shutdown().await;

        let result = service.record_measurement_and_score(Measurement::new(1, Utc::now(), 21.0));
        assert!(matches!(result, Err(ServiceError::Submit(SubmitError::ShutDown))));
        // Stored even though it could not be queued
        assert_eq!(
            store
                .query_measurements(1, &crate::logic::store::MeasurementQuery::ascending())
                .unwrap()
                .len(),
            11
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batch_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::logic::store::SqliteStore::open(&dir.path().join("flow.db")).unwrap());
        store.insert_device(&Device::new(1)).unwrap();
        store.insert_device(&Device::new(2)).unwrap();

        let start = Utc::now() - Duration::hours(48);
        for i in 0..30 {
            let m = Measurement::new(1, start + Duration::hours(i), 30.0 + (i % 4) as f64);
            store.append_measurement(&m).unwrap();
        }

        let service = DetectionService::new(context(Arc::new(MeanModel), W), Stores::shared(store.clone()));
        let report = tokio::task::block_in_place(|| service.run_batch()).unwrap();

        assert_eq!(report.devices, 2);
        assert_eq!(report.calibrated, 2);
        assert_eq!(report.predictions, 10);
        assert_eq!(report.skipped, 1);
        assert!(store.get_device(1).unwrap().unwrap().threshold.is_some());
        assert_eq!(store.get_device(2).unwrap().unwrap().threshold, Some(0.015));
        assert!(service.device_status(1).is_ok());
        assert_eq!(service.device_status(2).unwrap(), PredictionLabel::Normal);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_score_and_status() {
        let (_store, service) = service_with(3);

        let score = service.score(1, 25.0);
        assert_eq!(score, Score::degraded(0.015, crate::logic::scoring::DegradedReason::InsufficientData));

        let status = service.engine_status();
        assert_eq!(status.window_len, W);
        assert!(!status.model.trained);
        assert_eq!(status.model.backend, ModelBackend::Custom);
        assert_eq!(status.pool.completed, 0);
    }
}
