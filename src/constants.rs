//! Central Configuration Constants
//!
//! Single source of truth for all engine defaults.
//! Environment overrides are read in `logic::config`.

/// Window length W (7 days * 24 hourly readings)
pub const DEFAULT_WINDOW_LEN: usize = 168;

/// Autoencoder architecture defaults
pub const DEFAULT_INPUT_SIZE: usize = 1;
pub const DEFAULT_HIDDEN_SIZE: usize = 32;
pub const DEFAULT_NUM_LAYERS: usize = 1;
pub const DEFAULT_DROPOUT_RATIO: f32 = 0.1;
pub const DEFAULT_USE_ACT: bool = true;

/// Threshold used when a device has too little history to calibrate
pub const FALLBACK_THRESHOLD: f64 = 0.015;

/// Calibration defaults
pub const DEFAULT_DAYS_BACK: u32 = 7;
pub const DEFAULT_PERCENTILE: f64 = 90.0;

/// Online normalization: minimum history before fitting on history instead of the window
pub const NORMALIZATION_MIN_HISTORY: usize = 50;

/// Online normalization: how many recent readings the scaler is fit on
pub const NORMALIZATION_HISTORY_LIMIT: usize = 500;

/// Confidence returned by every degraded response
pub const DEGRADED_CONFIDENCE: f64 = 0.95;

/// Model id stamped on prediction records
pub const DEFAULT_MODEL_ID: u32 = 1;

/// Scoring pool defaults
pub const DEFAULT_SCORING_WORKERS: usize = 4;
pub const DEFAULT_SCORING_QUEUE_CAPACITY: usize = 256;

/// Batch job: how many recent measurements are backfilled per device
pub const DEFAULT_BACKFILL_COUNT: usize = 10;

/// Default file names under the app data directory
pub const DEFAULT_MODEL_FILE: &str = "lstm_ae.json";
pub const DEFAULT_DATABASE_FILE: &str = "flow_sentinel.db";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "Flow Sentinel";
