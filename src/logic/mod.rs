//! Logic Module - Detection engine
//!
//! Leaf-first:
//! - `model/` - Scaler, reconstruction backends, threshold calibration
//! - `store/` - Device, measurement and prediction stores
//! - `scoring/` - Online decision for one reading
//! - `recorder`, `pipeline` - Persist scores as prediction records
//! - `worker` - Bounded pool for the live path
//! - `batch` - Calibrate all devices and backfill predictions

pub mod config;
pub mod context;
pub mod model;
pub mod store;
pub mod scoring;
pub mod recorder;
pub mod pipeline;
pub mod worker;
pub mod batch;
