//! API Module
//!
//! Surface consumed by the CRUD layer.
//!
//! Structure:
//! - service.rs: `DetectionService`, the calls the CRUD layer makes
//! - engine_status.rs: Status snapshot of model, inference and pool

pub mod engine_status;
pub mod service;

pub use engine_status::EngineStatus;
pub use service::{DetectionService, DeviceStatus, ServiceError};
