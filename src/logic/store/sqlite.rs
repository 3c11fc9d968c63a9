//! SQLite store - devices, measurements and predictions on disk
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that
//! lexical order equals time order.

use std::ops::Bound;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{
    Device, DeviceId, DeviceStore, Measurement, MeasurementQuery, MeasurementStore,
    PredictionRecord, PredictionStore, SortOrder, StoreError,
};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        log::info!("Database schema applied successfully");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Insert or replace a device row
    pub fn insert_device(&self, device: &Device) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO devices (id, name, threshold) VALUES (?1, ?2, ?3)",
            params![device.id, device.name, device.threshold],
        )?;
        Ok(())
    }
}

impl DeviceStore for SqliteStore {
    fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        let conn = self.conn.lock();
        let device = conn
            .query_row(
                "SELECT id, name, threshold FROM devices WHERE id = ?1",
                params![id],
                device_from_row,
            )
            .optional()?;
        Ok(device)
    }

    fn set_device_threshold(&self, id: DeviceId, threshold: f64) -> Result<(), StoreError> {
        let changed = self.conn.lock().execute(
            "UPDATE devices SET threshold = ?2 WHERE id = ?1",
            params![id, threshold],
        )?;
        if changed == 0 {
            return Err(StoreError::DeviceNotFound(id));
        }
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, threshold FROM devices ORDER BY id")?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }
}

impl MeasurementStore for SqliteStore {
    fn query_measurements(
        &self,
        device_id: DeviceId,
        query: &MeasurementQuery,
    ) -> Result<Vec<Measurement>, StoreError> {
        let mut sql = String::from(
            "SELECT device_id, measured_at, flow, pressure FROM measurements WHERE device_id = ?",
        );
        let mut args = vec![Value::Integer(device_id)];

        if let Some(range) = query.range {
            push_bound(&mut sql, &mut args, range.start, ">=", ">");
            push_bound(&mut sql, &mut args, range.end, "<=", "<");
        }

        sql.push_str(match query.order {
            SortOrder::Ascending => " ORDER BY measured_at ASC, id ASC",
            SortOrder::Descending => " ORDER BY measured_at DESC, id DESC",
        });

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit.min(i64::MAX as usize) as i64));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, DeviceId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(device_id, ts, flow, pressure)| {
                Ok(Measurement {
                    device_id,
                    timestamp: parse_timestamp(&ts)?,
                    flow,
                    pressure,
                })
            })
            .collect()
    }

    fn append_measurement(&self, measurement: &Measurement) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM devices WHERE id = ?1)",
            params![measurement.device_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::DeviceNotFound(measurement.device_id));
        }

        conn.execute(
            "INSERT INTO measurements (device_id, measured_at, flow, pressure) VALUES (?1, ?2, ?3, ?4)",
            params![
                measurement.device_id,
                format_timestamp(&measurement.timestamp),
                measurement.flow,
                measurement.pressure
            ],
        )?;
        Ok(())
    }
}

impl PredictionStore for SqliteStore {
    fn next_prediction_id(&self) -> Result<u64, StoreError> {
        let next: i64 = self.conn.lock().query_row(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM predictions",
            [],
            |row| row.get(0),
        )?;
        Ok(next as u64)
    }

    fn append_prediction(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            r#"
            INSERT INTO predictions
                (id, device_id, predicted_at, model_id, threshold, label, confidence, reconstruction_error, flow)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.id as i64,
                record.device_id,
                format_timestamp(&record.timestamp),
                record.model_id,
                record.threshold,
                record.label.as_str(),
                record.confidence,
                record.reconstruction_error,
                record.flow
            ],
        )?;
        Ok(())
    }

    fn latest_predictions(&self, device_id: DeviceId, limit: usize) -> Result<Vec<PredictionRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, device_id, predicted_at, model_id, threshold, label, confidence, reconstruction_error, flow
            FROM predictions
            WHERE device_id = ?1
            ORDER BY predicted_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;

        let raw = stmt
            .query_map(params![device_id, limit.min(i64::MAX as usize) as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, DeviceId>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, f64>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, device_id, ts, model_id, threshold, label, confidence, error, flow)| {
                Ok(PredictionRecord {
                    id: id as u64,
                    device_id,
                    timestamp: parse_timestamp(&ts)?,
                    model_id,
                    threshold,
                    label: label.parse()?,
                    confidence,
                    reconstruction_error: error,
                    flow,
                })
            })
            .collect()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        threshold: row.get(2)?,
    })
}

fn push_bound(
    sql: &mut String,
    args: &mut Vec<Value>,
    bound: Bound<DateTime<Utc>>,
    inclusive_op: &str,
    exclusive_op: &str,
) {
    let (op, ts) = match bound {
        Bound::Included(ts) => (inclusive_op, ts),
        Bound::Excluded(ts) => (exclusive_op, ts),
        Bound::Unbounded => return,
    };
    sql.push_str(&format!(" AND measured_at {} ?", op));
    args.push(Value::Text(format_timestamp(&ts)));
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

-- Devices (flow meters)
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY,
    name TEXT,
    threshold REAL
);

-- Measurements (append-only)
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    measured_at TEXT NOT NULL,
    flow REAL NOT NULL,
    pressure REAL
);

-- Predictions (immutable)
CREATE TABLE IF NOT EXISTS predictions (
    id INTEGER PRIMARY KEY,
    device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    predicted_at TEXT NOT NULL,
    model_id INTEGER NOT NULL,
    threshold REAL NOT NULL,
    label TEXT NOT NULL,
    confidence REAL NOT NULL,
    reconstruction_error REAL NOT NULL,
    flow REAL NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_measurements_device_time ON measurements(device_id, measured_at);
CREATE INDEX IF NOT EXISTS idx_predictions_device_time ON predictions(device_id, predicted_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::store::{PredictionLabel, TimeRange};
    use std::ops::Bound;
    use chrono::{Duration, TimeZone};

    fn t(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    fn record(id: u64, hour: i64, label: PredictionLabel) -> PredictionRecord {
        PredictionRecord {
            id,
            device_id: 1,
            timestamp: t(hour),
            model_id: 1,
            threshold: 0.02,
            label,
            confidence: 0.9,
            reconstruction_error: 0.001,
            flow: 12.5,
        }
    }

    #[test]
    fn test_device_threshold_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("flow.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_device(&Device::new(7).with_name("Main inlet")).unwrap();
            store.set_device_threshold(7, 0.042).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let device = store.get_device(7).unwrap().unwrap();
        assert_eq!(device.name.as_deref(), Some("Main inlet"));
        assert_eq!(device.threshold, Some(0.042));
        assert!(matches!(store.set_device_threshold(8, 0.1), Err(StoreError::DeviceNotFound(8))));
    }

    #[test]
    fn test_measurement_queries() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_device(&Device::new(1)).unwrap();
        for h in 0..6 {
            let mut m = Measurement::new(1, t(h), h as f64 * 10.0);
            m.pressure = Some(2.5);
            store.append_measurement(&m).unwrap();
        }

        let all = store.query_measurements(1, &MeasurementQuery::ascending()).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].timestamp, t(0));
        assert_eq!(all[0].pressure, Some(2.5));

        let recent = store
            .query_measurements(1, &MeasurementQuery::descending().limit(2))
            .unwrap();
        assert_eq!(recent.iter().map(|m| m.flow).collect::<Vec<_>>(), vec![50.0, 40.0]);

        let window = store
            .query_measurements(1, &MeasurementQuery::ascending().within(Some(TimeRange::between(t(1), t(3)))))
            .unwrap();
        assert_eq!(window.iter().map(|m| m.flow).collect::<Vec<_>>(), vec![10.0, 20.0, 30.0]);

        let earlier = TimeRange { start: Bound::Unbounded, end: Bound::Excluded(t(2)) };
        let before = store
            .query_measurements(1, &MeasurementQuery::descending().within(Some(earlier)))
            .unwrap();
        assert_eq!(before.iter().map(|m| m.flow).collect::<Vec<_>>(), vec![10.0, 0.0]);

        assert!(matches!(
            store.append_measurement(&Measurement::new(2, t(0), 1.0)),
            Err(StoreError::DeviceNotFound(2))
        ));
    }

    #[test]
    fn test_prediction_ids_and_latest() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_device(&Device::new(1)).unwrap();
        assert_eq!(store.next_prediction_id().unwrap(), 1);

        store.append_prediction(&record(1, 0, PredictionLabel::Normal)).unwrap();
        store.append_prediction(&record(2, 1, PredictionLabel::Anomaly)).unwrap();
        assert_eq!(store.next_prediction_id().unwrap(), 3);

        let latest = store.latest_predictions(1, 1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0], record(2, 1, PredictionLabel::Anomaly));
    }
}
