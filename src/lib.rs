//! Flow Sentinel - Online anomaly detection for flow meter telemetry
//!
//! A sequence autoencoder reconstructs the latest reading of a device from
//! its recent history; the reconstruction error is compared against a
//! per-device threshold calibrated from past errors.

pub mod api;
pub mod constants;
pub mod logic;

pub use api::{DetectionService, DeviceStatus, EngineStatus, ServiceError};
pub use logic::config::EngineConfig;
pub use logic::context::EngineContext;
pub use logic::model::{load_model, LoadedModel, ReconstructionModel};
pub use logic::scoring::Score;
pub use logic::store::{Device, Measurement, MemoryStore, PredictionLabel, SqliteStore, Stores};
pub use logic::worker::ScoringTicket;
