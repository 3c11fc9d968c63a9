//! Device threshold cache
//!
//! Thresholds live on the device row. A missing threshold is calibrated and
//! written back on first use; writers for one device are serialized so two
//! concurrent misses calibrate once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::logic::context::EngineContext;
use crate::logic::model::{Calibration, CalibrationError, CalibrationParams, ThresholdCalibrator};
use crate::logic::store::{DeviceId, DeviceStore, Stores, StoreError};
use super::types::ScoreError;

pub struct ThresholdCache {
    devices: Arc<dyn DeviceStore>,
    calibrator: ThresholdCalibrator,
    fallback: f64,
    locks: Mutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl ThresholdCache {
    pub fn new(ctx: EngineContext, stores: &Stores) -> Self {
        Self {
            devices: stores.devices.clone(),
            fallback: ctx.fallback_threshold(),
            calibrator: ThresholdCalibrator::new(ctx, stores.measurements.clone()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn device_lock(&self, device_id: DeviceId) -> Arc<Mutex<()>> {
        self.locks.lock().entry(device_id).or_default().clone()
    }

    /// Threshold stored on the device, if any
    pub fn cached(&self, device_id: DeviceId) -> Result<Option<f64>, StoreError> {
        let device = self
            .devices
            .get_device(device_id)?
            .ok_or(StoreError::DeviceNotFound(device_id))?;
        Ok(device.threshold)
    }

    /// Cached threshold, calibrating (7 days, p90) and persisting on a miss
    pub fn resolve(&self, device_id: DeviceId) -> Result<f64, ScoreError> {
        if let Some(threshold) = self.cached(device_id)? {
            return Ok(threshold);
        }

        let lock = self.device_lock(device_id);
        let _guard = lock.lock();

        // Another writer may have filled it while we waited
        if let Some(threshold) = self.cached(device_id)? {
            return Ok(threshold);
        }

        let calibration = self.calibrator.calibrate(device_id, CalibrationParams::default())?;
        self.devices.set_device_threshold(device_id, calibration.threshold)?;
        log::info!(
            "Device {}: threshold filled on miss ({:.6}, {:?})",
            device_id, calibration.threshold, calibration.source
        );
        Ok(calibration.threshold)
    }

    /// Cached threshold or a fresh calibration that is not persisted.
    /// Never fails; the fallback constant covers every error.
    pub fn cached_or_calibrated(&self, device_id: DeviceId) -> f64 {
        if let Ok(Some(threshold)) = self.cached(device_id) {
            return threshold;
        }
        match self.calibrator.calibrate(device_id, CalibrationParams::default()) {
            Ok(calibration) => calibration.threshold,
            Err(e) => {
                log::warn!("Device {}: calibration failed ({}), using fallback threshold", device_id, e);
                self.fallback
            }
        }
    }

    /// Cached threshold or the fallback constant
    pub fn cached_or_fallback(&self, device_id: DeviceId) -> f64 {
        self.cached(device_id).ok().flatten().unwrap_or(self.fallback)
    }

    /// Recalibrate with `params` and overwrite the stored threshold
    pub fn recalibrate(&self, device_id: DeviceId, params: CalibrationParams) -> Result<Calibration, CalibrationError> {
        let lock = self.device_lock(device_id);
        let _guard = lock.lock();

        let calibration = self.calibrator.calibrate(device_id, params)?;
        self.devices.set_device_threshold(device_id, calibration.threshold)?;
        Ok(calibration)
    }
}
