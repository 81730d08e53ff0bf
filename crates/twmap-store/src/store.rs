//! SQLite-backed weather record store.
//!
//! Records are keyed by `(location_name, forecast_time)`. Saving an existing
//! key updates its temperature, unit and `updated_at` in place.
//!
//! Forecast times are stored in canonical UTC+8 form, so text comparison in
//! SQL orders them chronologically and one instant maps to one key.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};

use twmap_core::{DatabaseError, RusqliteErrorExt, StorageConfig};
use twmap_weather::{canonical_forecast_time, WeatherRecord};

use crate::types::{StoreStatistics, StoredRecord};

/// Default retention window for `cleanup`.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
/// How long a writer waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub type StoreResult<T> = Result<T, DatabaseError>;

const COLUMNS: &str = "id, location_name, latitude, longitude, temperature, unit, forecast_time, \
     county_name, town_name, weather_description, humidity, wind_speed, created_at, updated_at";

const UPSERT_SQL: &str = r#"
    INSERT INTO weather_records (
        location_name, latitude, longitude, temperature, unit, forecast_time,
        county_name, town_name, weather_description, humidity, wind_speed,
        created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
    ON CONFLICT(location_name, forecast_time) DO UPDATE SET
        temperature = excluded.temperature,
        unit = excluded.unit,
        updated_at = excluded.updated_at
"#;

/// Thread-safe SQLite store for weather records.
pub struct WeatherStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for WeatherStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherStore").finish_non_exhaustive()
    }
}

impl WeatherStore {
    /// Open or create the database at `path`, creating parent directories as needed.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!("Failed to create database directory {}: {}", parent.display(), e);
                DatabaseError::ConnectionFailed(e.to_string())
            })?;
        }

        let conn = Connection::open(path).map_err(|e| boundary_error("open", None, e))?;
        let store = Self::with_connection(conn, busy_timeout)?;
        tracing::info!("Weather store opened at {}", path.display());
        Ok(store)
    }

    pub fn from_config(config: &StorageConfig) -> StoreResult<Self> {
        Self::open(&config.db_path, Duration::from_secs(config.busy_timeout_secs))
    }

    /// Create an in-memory store. Contents vanish when it is dropped.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| boundary_error("open", None, e))?;
        Self::with_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    fn with_connection(conn: Connection, busy_timeout: Duration) -> StoreResult<Self> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| boundary_error("open", None, e))?;
        init_schema(&conn).map_err(|e| {
            let err = e.into_database_error();
            tracing::error!("Schema initialization failed: {}", err);
            DatabaseError::MigrationFailed(err.to_string())
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Upsert a batch in one transaction.
    ///
    /// Records with an unreadable forecast_time or that violate a constraint
    /// are skipped and logged; the rest of the batch still commits. Any other
    /// failure rolls back the whole batch. Returns how many rows were inserted
    /// or updated.
    pub fn save(&self, records: &[WeatherRecord]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| boundary_error("save", None, e))?;

        let now = timestamp(Utc::now());
        let mut written = 0;
        {
            let mut stmt = tx
                .prepare_cached(UPSERT_SQL)
                .map_err(|e| boundary_error("save", None, e))?;

            for record in records {
                let Some(forecast_time) = canonical_forecast_time(&record.forecast_time) else {
                    tracing::warn!(
                        "save: skipping record ({}, {}): forecast_time is not RFC 3339",
                        record.location_name,
                        record.forecast_time
                    );
                    continue;
                };

                let result = stmt.execute(params![
                    record.location_name,
                    record.latitude,
                    record.longitude,
                    record.temperature,
                    record.unit,
                    forecast_time,
                    record.county_name,
                    record.town_name,
                    record.weather_description,
                    record.humidity,
                    record.wind_speed,
                    now,
                ]);

                match result {
                    Ok(_) => written += 1,
                    Err(e) => match e.into_database_error() {
                        err @ DatabaseError::Constraint(_) => {
                            tracing::warn!(
                                "save: skipping record ({}, {}): {}",
                                record.location_name,
                                forecast_time,
                                err
                            );
                        }
                        err => {
                            tracing::error!(
                                "save: batch rolled back at key ({}, {}): {}",
                                record.location_name,
                                forecast_time,
                                err
                            );
                            return Err(err);
                        }
                    },
                }
            }
        }

        tx.commit().map_err(|e| boundary_error("save", None, e))?;

        tracing::info!("Saved {} of {} record(s)", written, records.len());
        Ok(written)
    }

    /// Most recent record (by forecast_time) for every location.
    pub fn get_latest(&self) -> StoreResult<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM weather_records w1
             WHERE forecast_time = (
                 SELECT MAX(forecast_time) FROM weather_records w2
                 WHERE w2.location_name = w1.location_name
             )
             ORDER BY location_name"
        );
        self.query("get_latest", None, &sql, [])
    }

    /// All records for a location, newest forecast_time first.
    pub fn get_by_location(&self, location_name: &str) -> StoreResult<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM weather_records
             WHERE location_name = ?1
             ORDER BY forecast_time DESC"
        );
        self.query("get_by_location", Some(location_name), &sql, params![location_name])
    }

    /// Records with forecast_time in `[start, end]`, oldest first.
    ///
    /// Bounds are RFC 3339 timestamps in any offset.
    pub fn get_by_time_range(&self, start: &str, end: &str) -> StoreResult<Vec<StoredRecord>> {
        let key = format!("{start}..{end}");
        let (Some(start), Some(end)) = (canonical_forecast_time(start), canonical_forecast_time(end))
        else {
            let err = DatabaseError::QueryFailed(format!("time range bounds are not RFC 3339: {key}"));
            tracing::error!("get_by_time_range failed: {}", err);
            return Err(err);
        };

        let sql = format!(
            "SELECT {COLUMNS} FROM weather_records
             WHERE forecast_time BETWEEN ?1 AND ?2
             ORDER BY forecast_time ASC, location_name ASC"
        );
        self.query("get_by_time_range", Some(&key), &sql, params![start, end])
    }

    /// Every record, grouped by location and ordered by time.
    pub fn export_all(&self) -> StoreResult<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM weather_records
             ORDER BY location_name ASC, forecast_time ASC"
        );
        self.query("export_all", None, &sql, [])
    }

    /// Delete records first stored more than `retention_days` ago.
    ///
    /// `cleanup(0)` empties the store. Returns the number of deleted rows.
    pub fn cleanup(&self, retention_days: u32) -> StoreResult<usize> {
        let now = Utc::now();
        let Some(cutoff) = chrono::Duration::try_days(i64::from(retention_days))
            .and_then(|window| now.checked_sub_signed(window))
        else {
            tracing::info!("Retention of {} days reaches past any record", retention_days);
            return Ok(0);
        };

        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM weather_records WHERE created_at <= ?1",
                params![timestamp(cutoff)],
            )
            .map_err(|e| boundary_error("cleanup", None, e))?;

        tracing::info!(
            "Cleaned up {} record(s) older than {} day(s)",
            deleted,
            retention_days
        );
        Ok(deleted)
    }

    /// Remove every record of one location.
    pub fn delete_location(&self, location_name: &str) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM weather_records WHERE location_name = ?1",
                params![location_name],
            )
            .map_err(|e| boundary_error("delete_location", Some(location_name), e))?;

        tracing::debug!("Deleted {} record(s) for {}", deleted, location_name);
        Ok(deleted)
    }

    pub fn statistics(&self) -> StoreResult<StoreStatistics> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT location_name), MIN(forecast_time), MAX(forecast_time)
             FROM weather_records",
            [],
            |row| {
                Ok(StoreStatistics {
                    total_records: row.get::<_, i64>(0)?.max(0) as u64,
                    unique_locations: row.get::<_, i64>(1)?.max(0) as u64,
                    oldest_forecast_time: row.get(2)?,
                    newest_forecast_time: row.get(3)?,
                })
            },
        )
        .map_err(|e| boundary_error("statistics", None, e))
    }

    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM weather_records", [], |row| row.get(0))
            .map_err(|e| boundary_error("count", None, e))?;
        Ok(count.max(0) as usize)
    }

    fn query<P: rusqlite::Params>(
        &self,
        operation: &'static str,
        key: Option<&str>,
        sql: &str,
        params: P,
    ) -> StoreResult<Vec<StoredRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| boundary_error(operation, key, e))?;

        let rows = stmt
            .query_map(params, row_to_record)
            .map_err(|e| boundary_error(operation, key, e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| boundary_error(operation, key, e))
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS weather_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            location_name TEXT NOT NULL CHECK (length(trim(location_name)) > 0),
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            temperature REAL NOT NULL,
            unit TEXT NOT NULL DEFAULT 'C',
            forecast_time TEXT NOT NULL CHECK (length(trim(forecast_time)) > 0),
            county_name TEXT NOT NULL DEFAULT '',
            town_name TEXT NOT NULL DEFAULT '',
            weather_description TEXT NOT NULL DEFAULT '',
            humidity REAL,
            wind_speed REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_weather_location_time
            ON weather_records(location_name, forecast_time);
        CREATE INDEX IF NOT EXISTS idx_weather_location ON weather_records(location_name);
        CREATE INDEX IF NOT EXISTS idx_weather_forecast_time ON weather_records(forecast_time);
        CREATE INDEX IF NOT EXISTS idx_weather_created_at ON weather_records(created_at);
        "#,
    )
}

/// Fixed-width UTC timestamps so that text comparison orders them correctly.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(index: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn row_to_record(row: &Row) -> rusqlite::Result<StoredRecord> {
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(StoredRecord {
        id: row.get(0)?,
        record: WeatherRecord {
            location_name: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            temperature: row.get(4)?,
            unit: row.get(5)?,
            forecast_time: row.get(6)?,
            county_name: row.get(7)?,
            town_name: row.get(8)?,
            weather_description: row.get(9)?,
            humidity: row.get(10)?,
            wind_speed: row.get(11)?,
        },
        created_at: parse_timestamp(12, &created_at)?,
        updated_at: parse_timestamp(13, &updated_at)?,
    })
}

/// Convert and log an engine error at the operation boundary.
fn boundary_error(operation: &str, key: Option<&str>, error: rusqlite::Error) -> DatabaseError {
    let err = error.into_database_error();
    match key {
        Some(key) => tracing::error!("{} failed for {}: {}", operation, key, err),
        None => tracing::error!("{} failed: {}", operation, err),
    }
    err
}
