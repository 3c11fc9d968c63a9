//! In-memory store

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::{
    Device, DeviceId, DeviceStore, Measurement, MeasurementQuery, MeasurementStore,
    PredictionRecord, PredictionStore, SortOrder, StoreError,
};

#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
    /// Per device, kept sorted by timestamp
    measurements: RwLock<HashMap<DeviceId, Vec<Measurement>>>,
    predictions: RwLock<Vec<PredictionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&self, device: Device) {
        self.devices.write().insert(device.id, device);
    }

    pub fn prediction_count(&self) -> usize {
        self.predictions.read().len()
    }
}

impl DeviceStore for MemoryStore {
    fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.read().get(&id).cloned())
    }

    fn set_device_threshold(&self, id: DeviceId, threshold: f64) -> Result<(), StoreError> {
        let mut devices = self.devices.write();
        let device = devices.get_mut(&id).ok_or(StoreError::DeviceNotFound(id))?;
        device.threshold = Some(threshold);
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices.read().values().cloned().collect())
    }
}

impl MeasurementStore for MemoryStore {
    fn query_measurements(
        &self,
        device_id: DeviceId,
        query: &MeasurementQuery,
    ) -> Result<Vec<Measurement>, StoreError> {
        let measurements = self.measurements.read();
        let Some(series) = measurements.get(&device_id) else {
            return Ok(Vec::new());
        };

        let in_range = |m: &&Measurement| query.range.map_or(true, |r| r.contains(&m.timestamp));
        let limit = query.limit.unwrap_or(usize::MAX);

        let rows = match query.order {
            SortOrder::Ascending => series.iter().filter(in_range).take(limit).cloned().collect(),
            SortOrder::Descending => series.iter().rev().filter(in_range).take(limit).cloned().collect(),
        };
        Ok(rows)
    }

    fn append_measurement(&self, measurement: &Measurement) -> Result<(), StoreError> {
        if !self.devices.read().contains_key(&measurement.device_id) {
            return Err(StoreError::DeviceNotFound(measurement.device_id));
        }

        let mut measurements = self.measurements.write();
        let series = measurements.entry(measurement.device_id).or_default();
        let pos = series.partition_point(|m| m.timestamp <= measurement.timestamp);
        series.insert(pos, measurement.clone());
        Ok(())
    }
}

impl PredictionStore for MemoryStore {
    fn next_prediction_id(&self) -> Result<u64, StoreError> {
        Ok(self.predictions.read().iter().map(|p| p.id).max().unwrap_or(0) + 1)
    }

    fn append_prediction(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        self.predictions.write().push(record.clone());
        Ok(())
    }

    fn latest_predictions(&self, device_id: DeviceId, limit: usize) -> Result<Vec<PredictionRecord>, StoreError> {
        let mut rows: Vec<PredictionRecord> = self
            .predictions
            .read()
            .iter()
            .filter(|p| p.device_id == device_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}
