//! Store Module - Device, measurement and prediction persistence
//!
//! The engine only talks to these traits. `MemoryStore` backs tests and
//! embedded use, `SqliteStore` is the on-disk implementation.

pub mod types;
pub mod memory;
pub mod sqlite;

use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use types::{Device, DeviceId, Measurement, PredictionLabel, PredictionRecord};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("invalid prediction label: {0}")]
    InvalidLabel(String),

    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// QUERIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Bound<DateTime<Utc>>,
    pub end: Bound<DateTime<Utc>>,
}

impl TimeRange {
    /// `[start, end]`
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Included(start),
            end: Bound::Included(end),
        }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        let after_start = match self.start {
            Bound::Included(s) => *ts >= s,
            Bound::Excluded(s) => *ts > s,
            Bound::Unbounded => true,
        };
        let before_end = match self.end {
            Bound::Included(e) => *ts <= e,
            Bound::Excluded(e) => *ts < e,
            Bound::Unbounded => true,
        };
        after_start && before_end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementQuery {
    pub range: Option<TimeRange>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl MeasurementQuery {
    pub fn ascending() -> Self {
        Self { range: None, order: SortOrder::Ascending, limit: None }
    }

    /// Most recent first
    pub fn descending() -> Self {
        Self { range: None, order: SortOrder::Descending, limit: None }
    }

    pub fn within(mut self, range: Option<TimeRange>) -> Self {
        self.range = range;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// STORE TRAITS
// ============================================================================

pub trait DeviceStore: Send + Sync {
    fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError>;

    fn set_device_threshold(&self, id: DeviceId, threshold: f64) -> Result<(), StoreError>;

    fn list_devices(&self) -> Result<Vec<Device>, StoreError>;
}

pub trait MeasurementStore: Send + Sync {
    fn query_measurements(
        &self,
        device_id: DeviceId,
        query: &MeasurementQuery,
    ) -> Result<Vec<Measurement>, StoreError>;

    fn append_measurement(&self, measurement: &Measurement) -> Result<(), StoreError>;
}

pub trait PredictionStore: Send + Sync {
    fn next_prediction_id(&self) -> Result<u64, StoreError>;

    fn append_prediction(&self, record: &PredictionRecord) -> Result<(), StoreError>;

    /// Most recent first
    fn latest_predictions(&self, device_id: DeviceId, limit: usize) -> Result<Vec<PredictionRecord>, StoreError>;
}

/// Handles to the three stores the engine consumes
#[derive(Clone)]
pub struct Stores {
    pub devices: Arc<dyn DeviceStore>,
    pub measurements: Arc<dyn MeasurementStore>,
    pub predictions: Arc<dyn PredictionStore>,
}

impl Stores {
    /// One backend serving all three roles
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: DeviceStore + MeasurementStore + PredictionStore + 'static,
    {
        Self {
            devices: store.clone(),
            measurements: store.clone(),
            predictions: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_range_bounds() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();

        let closed = TimeRange::between(t0, t1);
        assert!(closed.contains(&t0));
        assert!(closed.contains(&t1));

        let half_open = TimeRange { start: Bound::Unbounded, end: Bound::Excluded(t1) };
        assert!(half_open.contains(&t0));
        assert!(!half_open.contains(&t1));
    }
}
