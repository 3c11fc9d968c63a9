use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

pub type DeviceId = i64;

/// A flow meter as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: Option<String>,
    /// Cached anomaly threshold, filled on first scoring or on demand
    pub threshold: Option<f64>,
}

impl Device {
    pub fn new(id: DeviceId) -> Self {
        Self { id, name: None, threshold: None }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    /// Instant flow (L/h)
    pub flow: f64,
    pub pressure: Option<f64>,
}

impl Measurement {
    pub fn new(device_id: DeviceId, timestamp: DateTime<Utc>, flow: f64) -> Self {
        Self { device_id, timestamp, flow, pressure: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictionLabel {
    Normal,
    Anomaly,
}

impl PredictionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionLabel::Normal => "Normal",
            PredictionLabel::Anomaly => "Anomaly",
        }
    }
}

impl fmt::Display for PredictionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionLabel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Normal" => Ok(PredictionLabel::Normal),
            "Anomaly" => Ok(PredictionLabel::Anomaly),
            other => Err(StoreError::InvalidLabel(other.to_string())),
        }
    }
}

/// Immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: u64,
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub model_id: u32,
    /// Threshold the label was decided against
    pub threshold: f64,
    pub label: PredictionLabel,
    pub confidence: f64,
    pub reconstruction_error: f64,
    /// Flow value that was scored
    pub flow: f64,
}
