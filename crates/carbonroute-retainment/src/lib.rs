//! Retainment store for pending carbon-intensity readings.
//!
//! A reading that an upstream provider marks as not yet authoritative is kept here
//! for a bounded time so an external poller can re-check it. Records are written
//! once, never corrected, and disappear when their `expires_at` passes.
//!
//! Two stores implement [`RetainmentStore`]:
//! - [`DuckDbRetainmentStore`] persists to a `DuckDB` file with migrations.
//! - [`MemoryRetainmentStore`] keeps records in process memory.

pub mod duckdb;
pub mod memory;
pub mod migrations;

use std::env;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use ::duckdb::types::ToSql;
use ::duckdb::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::duckdb::ConnectionPool;
pub use crate::memory::MemoryRetainmentStore;

/// Default retention window for pending readings (two days).
pub const DEFAULT_TTL_SECS: u64 = 172_800;

/// Errors raised by retainment stores.
#[derive(Debug, Error)]
pub enum RetainmentError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("corrupt stored record '{id}': {message}")]
    Corrupt { id: String, message: String },
}

/// Store construction options.
#[derive(Debug, Clone)]
pub struct RetainmentConfig {
    pub db_path: PathBuf,
    pub max_pool_size: usize,
    pub ttl: Duration,
}

impl Default for RetainmentConfig {
    fn default() -> Self {
        Self {
            db_path: resolve_carbonroute_home().join("retainment.duckdb"),
            max_pool_size: 4,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
        }
    }
}

/// Identifier assigned to a record on insert (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a stored id.
    ///
    /// # Errors
    /// Returns an error when `value` is not a UUID.
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the engine knows about a pending reading at the moment it is seen.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReading {
    pub provider: String,
    pub zone: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub pue: f64,
    pub energy_kwh: Option<f64>,
    pub request_time: OffsetDateTime,
    pub window_start: OffsetDateTime,
    pub window_end: OffsetDateTime,
    pub raw_payload: serde_json::Value,
}

/// A retained pending reading.
///
/// Build it with [`RetainedRecord::pending`]; `valid` is always `false` and
/// `expires_at` is `creation_time + ttl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedRecord {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub pue: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_kwh: Option<f64>,
    #[serde(with = "rfc3339")]
    pub request_time: OffsetDateTime,
    #[serde(with = "rfc3339")]
    pub window_start: OffsetDateTime,
    #[serde(with = "rfc3339")]
    pub window_end: OffsetDateTime,
    pub raw_payload: serde_json::Value,
    pub valid: bool,
    #[serde(with = "rfc3339")]
    pub creation_time: OffsetDateTime,
    #[serde(with = "rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl RetainedRecord {
    #[must_use]
    pub fn pending(reading: PendingReading, ttl: Duration, now: OffsetDateTime) -> Self {
        let creation_time = now.replace_nanosecond(0).unwrap_or(now);
        let ttl = time::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        let expires_at = creation_time
            .checked_add(ttl)
            .unwrap_or(creation_time);

        Self {
            provider: reading.provider,
            zone: reading.zone,
            lat: reading.lat,
            lon: reading.lon,
            pue: reading.pue,
            energy_kwh: reading.energy_kwh,
            request_time: reading.request_time,
            window_start: reading.window_start,
            window_end: reading.window_end,
            raw_payload: reading.raw_payload,
            valid: false,
            creation_time,
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    fn check(&self) -> Result<(), RetainmentError> {
        if self.valid {
            return Err(RetainmentError::InvalidRecord(String::from(
                "only readings with valid=false are retained",
            )));
        }
        if self.expires_at <= self.creation_time {
            return Err(RetainmentError::InvalidRecord(String::from(
                "expires_at must be after creation_time",
            )));
        }
        if self.provider.trim().is_empty() {
            return Err(RetainmentError::InvalidRecord(String::from(
                "provider must not be empty",
            )));
        }
        Ok(())
    }
}

/// A record together with the id it was stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub record: RetainedRecord,
}

/// Point query used by the re-check poller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingQuery {
    pub lat: f64,
    pub lon: f64,
    pub request_time: OffsetDateTime,
}

/// Append-only store of pending readings with TTL expiry.
///
/// Implementations are internally synchronized; `insert` may be called from many
/// threads at once and never reads existing rows before writing.
pub trait RetainmentStore: Send + Sync {
    fn insert(&self, record: RetainedRecord) -> Result<RecordId, RetainmentError>;

    /// Non-expired pending records for one point, oldest first.
    fn find_pending(
        &self,
        query: &PendingQuery,
        now: OffsetDateTime,
    ) -> Result<Vec<StoredRecord>, RetainmentError>;

    /// Delete expired records, returning how many were removed.
    fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, RetainmentError>;

    /// Number of non-expired records.
    fn count(&self, now: OffsetDateTime) -> Result<usize, RetainmentError>;
}

/// `DuckDB`-backed store. Expiry is enforced by the store itself: inserts sweep
/// expired rows and queries filter on `expires_at`.
#[derive(Clone)]
pub struct DuckDbRetainmentStore {
    pool: ConnectionPool,
    config: RetainmentConfig,
}

impl DuckDbRetainmentStore {
    /// Open the store at `config.db_path`, creating directories and applying
    /// migrations as needed.
    ///
    /// # Errors
    /// Returns an error if the directory or database cannot be created, or if a
    /// migration fails.
    pub fn open(config: RetainmentConfig) -> Result<Self, RetainmentError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        Self::initialize(pool, config)
    }

    /// Open a private in-memory database with the same schema.
    ///
    /// # Errors
    /// Returns an error if `DuckDB` cannot create the database or apply migrations.
    pub fn open_in_memory(ttl: Duration) -> Result<Self, RetainmentError> {
        let pool = ConnectionPool::open_in_memory(2)?;
        let config = RetainmentConfig {
            db_path: pool.db_path().to_path_buf(),
            max_pool_size: 2,
            ttl,
        };
        Self::initialize(pool, config)
    }

    fn initialize(pool: ConnectionPool, config: RetainmentConfig) -> Result<Self, RetainmentError> {
        {
            let connection = pool.acquire()?;
            migrations::apply_migrations(&connection)?;
        }
        tracing::debug!(path = %config.db_path.display(), "retainment store ready");
        Ok(Self { pool, config })
    }

    #[must_use]
    pub fn config(&self) -> &RetainmentConfig {
        &self.config
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }
}

impl RetainmentStore for DuckDbRetainmentStore {
    fn insert(&self, record: RetainedRecord) -> Result<RecordId, RetainmentError> {
        record.check()?;

        let id = RecordId::new();
        let id_text = id.to_string();
        let raw_payload = serde_json::to_string(&record.raw_payload)?;
        let request_time = record.request_time.unix_timestamp();
        let window_start = record.window_start.unix_timestamp();
        let window_end = record.window_end.unix_timestamp();
        let creation_time = record.creation_time.unix_timestamp();
        let expires_at = record.expires_at.unix_timestamp();

        let connection = self.pool.acquire()?;
        let swept = sweep_expired(&connection, creation_time)?;
        if swept > 0 {
            tracing::debug!(swept, "swept expired retained readings on insert");
        }

        let params: [&dyn ToSql; 14] = [
            &id_text,
            &record.provider,
            &record.zone,
            &record.lat,
            &record.lon,
            &record.pue,
            &record.energy_kwh,
            &request_time,
            &window_start,
            &window_end,
            &raw_payload,
            &record.valid,
            &creation_time,
            &expires_at,
        ];
        connection.execute(
            r#"
INSERT INTO retained_readings (
    id, provider, zone, lat, lon, pue, energy_kwh,
    request_time, window_start, window_end, raw_payload,
    valid, creation_time, expires_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#,
            params.as_slice(),
        )?;

        tracing::info!(
            record_id = %id,
            provider = %record.provider,
            lat = record.lat,
            lon = record.lon,
            "retained pending reading"
        );
        Ok(id)
    }

    fn find_pending(
        &self,
        query: &PendingQuery,
        now: OffsetDateTime,
    ) -> Result<Vec<StoredRecord>, RetainmentError> {
        let connection = self.pool.acquire()?;
        let mut statement = connection.prepare(
            r#"
SELECT id, provider, zone, lat, lon, pue, energy_kwh,
       request_time, window_start, window_end, raw_payload,
       valid, creation_time, expires_at
FROM retained_readings
WHERE valid = FALSE
  AND lat = ?
  AND lon = ?
  AND request_time = ?
  AND expires_at > ?
ORDER BY creation_time, id
"#,
        )?;

        let rows = statement.query_map(
            params![
                query.lat,
                query.lon,
                query.request_time.unix_timestamp(),
                now.unix_timestamp()
            ],
            |row| {
                Ok(RawRow {
                    id: row.get(0)?,
                    provider: row.get(1)?,
                    zone: row.get(2)?,
                    lat: row.get(3)?,
                    lon: row.get(4)?,
                    pue: row.get(5)?,
                    energy_kwh: row.get(6)?,
                    request_time: row.get(7)?,
                    window_start: row.get(8)?,
                    window_end: row.get(9)?,
                    raw_payload: row.get(10)?,
                    valid: row.get(11)?,
                    creation_time: row.get(12)?,
                    expires_at: row.get(13)?,
                })
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_stored()?);
        }
        Ok(records)
    }

    fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, RetainmentError> {
        let connection = self.pool.acquire()?;
        let removed = sweep_expired(&connection, now.unix_timestamp())?;
        tracing::info!(removed, "purged expired retained readings");
        Ok(removed)
    }

    fn count(&self, now: OffsetDateTime) -> Result<usize, RetainmentError> {
        let connection = self.pool.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM retained_readings WHERE expires_at > ?",
            params![now.unix_timestamp()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn sweep_expired(connection: &Connection, now_unix: i64) -> Result<usize, RetainmentError> {
    let removed = connection.execute(
        "DELETE FROM retained_readings WHERE expires_at <= ?",
        params![now_unix],
    )?;
    Ok(removed)
}

struct RawRow {
    id: String,
    provider: String,
    zone: Option<String>,
    lat: f64,
    lon: f64,
    pue: f64,
    energy_kwh: Option<f64>,
    request_time: i64,
    window_start: i64,
    window_end: i64,
    raw_payload: String,
    valid: bool,
    creation_time: i64,
    expires_at: i64,
}

impl RawRow {
    fn into_stored(self) -> Result<StoredRecord, RetainmentError> {
        let corrupt = |message: String| RetainmentError::Corrupt {
            id: self.id.clone(),
            message,
        };
        let timestamp = |value: i64| {
            OffsetDateTime::from_unix_timestamp(value).map_err(|error| corrupt(error.to_string()))
        };

        let id = RecordId::parse(&self.id).map_err(|error| corrupt(error.to_string()))?;
        let raw_payload = serde_json::from_str(&self.raw_payload)?;

        Ok(StoredRecord {
            id,
            record: RetainedRecord {
                provider: self.provider.clone(),
                zone: self.zone.clone(),
                lat: self.lat,
                lon: self.lon,
                pue: self.pue,
                energy_kwh: self.energy_kwh,
                request_time: timestamp(self.request_time)?,
                window_start: timestamp(self.window_start)?,
                window_end: timestamp(self.window_end)?,
                raw_payload,
                valid: self.valid,
                creation_time: timestamp(self.creation_time)?,
                expires_at: timestamp(self.expires_at)?,
            },
        })
    }
}

mod rfc3339 {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        OffsetDateTime::parse(&raw, &Rfc3339).map_err(de::Error::custom)
    }
}

fn resolve_carbonroute_home() -> PathBuf {
    if let Some(path) = env::var_os("CARBONROUTE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".carbonroute");
    }

    PathBuf::from(".carbonroute")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use time::macros::datetime;

    pub fn sample_reading() -> PendingReading {
        PendingReading {
            provider: String::from("footprint_window"),
            zone: Some(String::from("NL")),
            lat: 52.0,
            lon: 5.0,
            pue: 1.4,
            energy_kwh: Some(3.0),
            request_time: datetime!(2025-03-01 10:00 UTC),
            window_start: datetime!(2025-03-01 10:00 UTC),
            window_end: datetime!(2025-03-01 11:00 UTC),
            raw_payload: serde_json::json!({"value": 210.0, "valid": false}),
        }
    }
}
