//! Batch Job - calibrate every device, then backfill recent predictions

use serde::{Deserialize, Serialize};

use super::model::CalibrationParams;
use super::pipeline::ScoringPipeline;
use super::store::{MeasurementQuery, StoreError, Stores};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub devices: usize,
    /// Thresholds written
    pub calibrated: usize,
    /// Calibrations that failed
    pub failed: usize,
    /// Prediction records written
    pub predictions: usize,
    /// Devices with too few readings to backfill
    pub skipped: usize,
}

/// Recalibrate and persist each device threshold, then score and record the
/// last `backfill_count` readings of every device that has that many.
///
/// Every backfilled reading is scored against the device's latest window.
pub fn run_batch(
    pipeline: &ScoringPipeline,
    stores: &Stores,
    params: CalibrationParams,
    backfill_count: usize,
) -> Result<BatchReport, StoreError> {
    let devices = stores.devices.list_devices()?;
    let mut report = BatchReport {
        devices: devices.len(),
        ..Default::default()
    };

    log::info!("Batch: calibrating {} devices", devices.len());

    for device in &devices {
        match pipeline.scorer().thresholds().recalibrate(device.id, params) {
            Ok(calibration) => {
                report.calibrated += 1;
                log::info!(
                    "Device {}: threshold {:.6} ({:?}, {} windows)",
                    device.id, calibration.threshold, calibration.source, calibration.windows
                );
            }
            Err(e) => {
                report.failed += 1;
                log::error!("Device {}: calibration failed: {}", device.id, e);
            }
        }
    }

    if backfill_count == 0 {
        return Ok(report);
    }

    for device in &devices {
        let mut recent = stores
            .measurements
            .query_measurements(device.id, &MeasurementQuery::descending().limit(backfill_count))?;

        if recent.len() < backfill_count {
            log::info!(
                "Device {}: only {} measurements, skipping backfill",
                device.id, recent.len()
            );
            report.skipped += 1;
            continue;
        }

        recent.reverse();
        let written = recent
            .iter()
            .filter_map(|m| pipeline.score_and_record(m).record)
            .count();

        log::info!("Device {}: generated {} predictions", device.id, written);
        report.predictions += written;
    }

    log::info!(
        "Batch complete: {} calibrated, {} failed, {} predictions, {} skipped",
        report.calibrated, report.failed, report.predictions, report.skipped
    );
    Ok(report)
}
