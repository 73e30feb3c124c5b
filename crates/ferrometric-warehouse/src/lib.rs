//! # Ferrometric Warehouse
//!
//! DuckDB-based storage for ingested metric series.
//!
//! ## Overview
//!
//! The warehouse owns three pieces of state per series:
//!
//! - the **catalog row** describing the series and its value field names,
//! - the **metric values**, keyed by `(series_id, ts_ms)`,
//! - the **watermark**, the exclusive upper bound of durably ingested data.
//!
//! Values and watermark are only ever written together by
//! [`Warehouse::commit_window`], inside one transaction. A failed commit leaves
//! neither the rows nor the watermark changed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrometric_warehouse::{MetricRow, SeriesRow, Warehouse, WarehouseConfig, WindowCommit};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::in_memory())?;
//!     let series = SeriesRow {
//!         series_id: "cryptoquant/btc/exchange-reserve/binance/day".to_string(),
//!         provider: "cryptoquant".to_string(),
//!         asset: "btc".to_string(),
//!         metric: "exchange-reserve".to_string(),
//!         exchange: Some("binance".to_string()),
//!         resolution: "day".to_string(),
//!         chart_id: "61a5fb1f45de34521f1dcb6d".to_string(),
//!         field_names: vec!["reserve".to_string()],
//!     };
//!
//!     warehouse.commit_window(&WindowCommit {
//!         run_id: "run-1",
//!         series: &series,
//!         window_start_ms: 0,
//!         window_end_ms: 86_400_000,
//!         rows: &[MetricRow { ts_ms: 0, fields: vec![Some(1.0)] }],
//!     })?;
//!
//!     assert_eq!(warehouse.watermark(&series.series_id)?, Some(86_400_000));
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `series` | Series catalog |
//! | `metric_values` | One row per `(series_id, ts_ms)` |
//! | `series_watermarks` | Ingestion watermark per series |
//! | `ingest_log` | One row per committed fetch window |

pub mod duckdb;
pub mod migrations;

use std::fs;
use std::path::PathBuf;

use ::duckdb::{params, Connection, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{DbLocation, DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error, including transaction conflicts.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Stored values could not be encoded or decoded.
    #[error("field encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The store may hold a partial write or an inconsistent watermark.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl WarehouseError {
    /// Whether the error leaves the store in a state that must not be retried over.
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Database file or in-memory.
    pub location: DbLocation,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    /// A file-backed warehouse at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File(path.into()),
            max_pool_size: 4,
        }
    }

    /// A private in-memory warehouse, mostly useful in tests.
    pub fn in_memory() -> Self {
        Self {
            location: DbLocation::InMemory,
            max_pool_size: 4,
        }
    }
}

/// Catalog entry for one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesRow {
    pub series_id: String,
    pub provider: String,
    pub asset: String,
    pub metric: String,
    pub exchange: Option<String>,
    pub resolution: String,
    pub chart_id: String,
    /// Names of the stored value fields, in `MetricRow::fields` order. An
    /// empty list never overwrites a known one.
    pub field_names: Vec<String>,
}

/// One stored observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    /// Observation timestamp, epoch milliseconds UTC.
    pub ts_ms: i64,
    /// Field values in provider order.
    pub fields: Vec<Option<f64>>,
}

/// Everything written by one successful fetch window.
#[derive(Debug, Clone, Copy)]
pub struct WindowCommit<'a> {
    pub run_id: &'a str,
    pub series: &'a SeriesRow,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub rows: &'a [MetricRow],
}

/// Result of a committed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// Number of rows inserted or overwritten.
    pub rows_written: usize,
    /// Watermark before the commit.
    pub previous_watermark_ms: Option<i64>,
    /// Watermark after the commit.
    pub watermark_ms: i64,
}

/// Watermark of one series, as listed by [`Warehouse::watermarks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatermarkRow {
    pub series_id: String,
    pub watermark_ms: i64,
    pub row_count: i64,
}

/// The main warehouse interface for metric storage.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with the specified configuration and apply migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.location.path().and_then(|path| path.parent()) {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::open(config.location, config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Initialize the database schema.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Location of the database.
    pub fn location(&self) -> &DbLocation {
        self.manager.location()
    }

    /// Upsert a window's rows and advance the series watermark atomically.
    ///
    /// Rows are keyed by `(series_id, ts_ms)`; existing rows are overwritten.
    /// The watermark becomes `max(current, window_end_ms)`. Either every row
    /// and the watermark are committed, or nothing is.
    pub fn commit_window(&self, commit: &WindowCommit<'_>) -> Result<CommitSummary, WarehouseError> {
        if commit.window_end_ms < commit.window_start_ms {
            return Err(WarehouseError::Integrity(format!(
                "window end {} precedes start {} for '{}'",
                commit.window_end_ms, commit.window_start_ms, commit.series.series_id
            )));
        }

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<CommitSummary, WarehouseError> {
            let series = commit.series;
            upsert_series(&connection, series)?;

            let previous_watermark_ms = read_watermark(&connection, &series.series_id)?;

            for row in commit.rows {
                let encoded = serde_json::to_string(&row.fields)?;
                let params: [&dyn ToSql; 3] = [&series.series_id, &row.ts_ms, &encoded];
                connection.execute(
                    "INSERT OR REPLACE INTO metric_values \
                     (series_id, ts_ms, field_values, updated_at) \
                     VALUES (?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }

            let params: [&dyn ToSql; 2] = [&series.series_id, &commit.window_end_ms];
            connection.execute(
                "INSERT INTO series_watermarks (series_id, watermark_ms, updated_at) \
                 VALUES (?, ?, CURRENT_TIMESTAMP) \
                 ON CONFLICT (series_id) DO UPDATE SET \
                 watermark_ms = greatest(watermark_ms, excluded.watermark_ms), \
                 updated_at = CURRENT_TIMESTAMP",
                params.as_slice(),
            )?;

            let expected = previous_watermark_ms
                .map_or(commit.window_end_ms, |current| current.max(commit.window_end_ms));
            let watermark_ms = read_watermark(&connection, &series.series_id)?;
            if watermark_ms != Some(expected) {
                return Err(WarehouseError::Integrity(format!(
                    "watermark for '{}' is {:?} after advance, expected {expected}",
                    series.series_id, watermark_ms
                )));
            }

            let row_count = commit.rows.len() as i64;
            let params: [&dyn ToSql; 5] = [
                &commit.run_id,
                &series.series_id,
                &commit.window_start_ms,
                &commit.window_end_ms,
                &row_count,
            ];
            connection.execute(
                "INSERT INTO ingest_log \
                 (run_id, series_id, window_start_ms, window_end_ms, row_count, logged_at) \
                 VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                params.as_slice(),
            )?;

            Ok(CommitSummary {
                rows_written: commit.rows.len(),
                previous_watermark_ms,
                watermark_ms: expected,
            })
        })();

        finalize_transaction(&connection, result)
    }

    /// Add or refresh catalog rows without touching values or watermarks.
    ///
    /// Returns the number of rows written. All rows are written in one
    /// transaction.
    pub fn register_series(&self, series: &[SeriesRow]) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for row in series {
                upsert_series(&connection, row)?;
            }
            Ok(series.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Current watermark of a series, `None` if it was never ingested.
    pub fn watermark(&self, series_id: &str) -> Result<Option<i64>, WarehouseError> {
        let connection = self.manager.acquire()?;
        Ok(read_watermark(&connection, series_id)?)
    }

    /// Whether every observation of `series_id` before `ts_ms` has been ingested.
    pub fn is_ingested_through(&self, series_id: &str, ts_ms: i64) -> Result<bool, WarehouseError> {
        Ok(self
            .watermark(series_id)?
            .is_some_and(|watermark| watermark >= ts_ms))
    }

    /// All series watermarks with their stored row counts, ordered by series id.
    pub fn watermarks(&self) -> Result<Vec<WatermarkRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT w.series_id, w.watermark_ms, \
             (SELECT COUNT(*) FROM metric_values v WHERE v.series_id = w.series_id) \
             FROM series_watermarks w ORDER BY w.series_id",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(WatermarkRow {
                series_id: row.get(0)?,
                watermark_ms: row.get(1)?,
                row_count: row.get(2)?,
            })
        })?;

        let mut watermarks = Vec::new();
        for row in rows {
            watermarks.push(row?);
        }
        Ok(watermarks)
    }

    /// Stored rows of a series in timestamp order.
    pub fn metric_rows(&self, series_id: &str) -> Result<Vec<MetricRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT ts_ms, field_values FROM metric_values WHERE series_id = ? ORDER BY ts_ms",
        )?;
        let rows = statement.query_map(params![series_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut decoded = Vec::new();
        for row in rows {
            let (ts_ms, encoded) = row?;
            decoded.push(MetricRow {
                ts_ms,
                fields: serde_json::from_str(&encoded)?,
            });
        }
        Ok(decoded)
    }

    /// Catalog row of a series, if it was ever registered or committed.
    pub fn series(&self, series_id: &str) -> Result<Option<SeriesRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(&format!("{SERIES_SELECT} WHERE series_id = ?"))?;
        let mut rows = statement.query_map(params![series_id], read_series_columns)?;

        rows.next().transpose()?.map(decode_series).transpose()
    }

    /// Every catalog row, ordered by series id.
    pub fn catalog(&self) -> Result<Vec<SeriesRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(&format!("{SERIES_SELECT} ORDER BY series_id"))?;
        let rows = statement.query_map([], read_series_columns)?;

        let mut catalog = Vec::new();
        for row in rows {
            catalog.push(decode_series(row?)?);
        }
        Ok(catalog)
    }

    /// Acquire a raw pooled connection for administrative work.
    pub fn connection(&self) -> Result<PooledConnection, WarehouseError> {
        Ok(self.manager.acquire()?)
    }
}

const SERIES_SELECT: &str = "SELECT series_id, provider, asset, metric, exchange, resolution, \
     chart_id, field_names FROM series";

/// A catalog row whose `field_names` is still JSON text.
type RawSeriesRow = (SeriesRow, Option<String>);

fn read_series_columns(row: &::duckdb::Row<'_>) -> Result<RawSeriesRow, ::duckdb::Error> {
    Ok((
        SeriesRow {
            series_id: row.get(0)?,
            provider: row.get(1)?,
            asset: row.get(2)?,
            metric: row.get(3)?,
            exchange: row.get(4)?,
            resolution: row.get(5)?,
            chart_id: row.get(6)?,
            field_names: Vec::new(),
        },
        row.get(7)?,
    ))
}

fn decode_series((mut series, field_names): RawSeriesRow) -> Result<SeriesRow, WarehouseError> {
    if let Some(encoded) = field_names {
        series.field_names = serde_json::from_str(&encoded)?;
    }
    Ok(series)
}

/// Insert or refresh a catalog row. Known field names survive an update that
/// carries none.
fn upsert_series(connection: &Connection, series: &SeriesRow) -> Result<(), WarehouseError> {
    let field_names = serde_json::to_string(&series.field_names)?;
    let params: [&dyn ToSql; 8] = [
        &series.series_id,
        &series.provider,
        &series.asset,
        &series.metric,
        &series.exchange,
        &series.resolution,
        &series.chart_id,
        &field_names,
    ];
    connection.execute(
        "INSERT INTO series \
         (series_id, provider, asset, metric, exchange, resolution, chart_id, field_names, \
         updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT (series_id) DO UPDATE SET \
         provider = excluded.provider, \
         asset = excluded.asset, \
         metric = excluded.metric, \
         exchange = excluded.exchange, \
         resolution = excluded.resolution, \
         chart_id = excluded.chart_id, \
         field_names = CASE WHEN excluded.field_names = '[]' THEN field_names \
         ELSE excluded.field_names END, \
         updated_at = CURRENT_TIMESTAMP",
        params.as_slice(),
    )?;
    Ok(())
}

fn read_watermark(connection: &Connection, series_id: &str) -> Result<Option<i64>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT watermark_ms FROM series_watermarks WHERE series_id = ?")?;
    let mut rows = statement.query_map(params![series_id], |row| row.get::<_, i64>(0))?;
    let watermark = rows.next().transpose()?;
    Ok(watermark)
}

/// Finalize a transaction, committing on success or rolling back on failure.
///
/// A rollback that itself fails leaves the transaction state unknown and is
/// reported as an integrity violation.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => match connection.execute_batch("ROLLBACK") {
            Ok(()) => Err(error),
            Err(rollback) => Err(WarehouseError::Integrity(format!(
                "rollback failed after '{error}': {rollback}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn series_row(series_id: &str) -> SeriesRow {
        SeriesRow {
            series_id: series_id.to_string(),
            provider: "cryptoquant".to_string(),
            asset: "btc".to_string(),
            metric: "exchange-reserve".to_string(),
            exchange: Some("binance".to_string()),
            resolution: "day".to_string(),
            chart_id: "chart-1".to_string(),
            field_names: vec!["reserve".to_string(), "reserve_usd".to_string()],
        }
    }

    #[test]
    fn initializes_tables() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::file(
            temp.path().join("nested").join("warehouse.duckdb"),
        ))
        .expect("warehouse open");

        let connection = warehouse.connection().expect("connection");
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_name IN ('series', 'metric_values', 'series_watermarks', 'ingest_log')",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(count, 4);
    }

    #[test]
    fn commit_window_writes_rows_and_watermark() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        let series = series_row("s1");
        let rows = vec![
            MetricRow { ts_ms: 0, fields: vec![Some(1.0), None] },
            MetricRow { ts_ms: 1_000, fields: vec![Some(2.0), Some(3.0)] },
        ];

        let summary = warehouse
            .commit_window(&WindowCommit {
                run_id: "run-1",
                series: &series,
                window_start_ms: 0,
                window_end_ms: 2_000,
                rows: &rows,
            })
            .expect("commit");

        assert_eq!(summary.rows_written, 2);
        assert_eq!(summary.previous_watermark_ms, None);
        assert_eq!(summary.watermark_ms, 2_000);
        assert_eq!(warehouse.metric_rows("s1").expect("rows"), rows);
        assert_eq!(warehouse.series("s1").expect("series"), Some(series));
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        let series = series_row("s1");

        for end in [5_000, 3_000] {
            warehouse
                .commit_window(&WindowCommit {
                    run_id: "run-1",
                    series: &series,
                    window_start_ms: 0,
                    window_end_ms: end,
                    rows: &[],
                })
                .expect("commit");
        }

        assert_eq!(warehouse.watermark("s1").expect("watermark"), Some(5_000));
        assert!(warehouse.is_ingested_through("s1", 5_000).expect("query"));
        assert!(!warehouse.is_ingested_through("s1", 5_001).expect("query"));
        assert!(!warehouse.is_ingested_through("unknown", 0).expect("query"));
    }

    #[test]
    fn inverted_window_is_rejected_as_integrity_violation() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        let series = series_row("s1");

        let error = warehouse
            .commit_window(&WindowCommit {
                run_id: "run-1",
                series: &series,
                window_start_ms: 10,
                window_end_ms: 5,
                rows: &[],
            })
            .expect_err("must fail");

        assert!(error.is_integrity());
        assert_eq!(warehouse.watermark("s1").expect("watermark"), None);
    }

    #[test]
    fn failed_commit_rolls_back_rows_and_watermark() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        let series = series_row("s1");
        warehouse
            .connection()
            .expect("connection")
            .execute_batch("DROP TABLE ingest_log")
            .expect("drop");

        let error = warehouse
            .commit_window(&WindowCommit {
                run_id: "run-1",
                series: &series,
                window_start_ms: 0,
                window_end_ms: 1_000,
                rows: &[MetricRow { ts_ms: 0, fields: vec![Some(1.0)] }],
            })
            .expect_err("must fail");

        assert!(!error.is_integrity());
        assert!(warehouse.metric_rows("s1").expect("rows").is_empty());
        assert_eq!(warehouse.watermark("s1").expect("watermark"), None);
        assert_eq!(warehouse.series("s1").expect("series"), None);
    }

    #[test]
    fn registered_series_keep_field_names_across_commits() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        let discovered = series_row("s1");
        let mut unnamed = series_row("s0");
        unnamed.field_names.clear();

        let written = warehouse
            .register_series(&[discovered.clone(), unnamed.clone()])
            .expect("register");
        assert_eq!(written, 2);
        assert_eq!(warehouse.watermark("s1").expect("watermark"), None);

        let mut refreshed = discovered.clone();
        refreshed.field_names.clear();
        refreshed.chart_id = "chart-2".to_string();
        warehouse
            .commit_window(&WindowCommit {
                run_id: "run-1",
                series: &refreshed,
                window_start_ms: 0,
                window_end_ms: 1_000,
                rows: &[],
            })
            .expect("commit");

        let stored = warehouse.series("s1").expect("series").expect("row");
        assert_eq!(stored.chart_id, "chart-2");
        assert_eq!(stored.field_names, discovered.field_names);

        let catalog = warehouse.catalog().expect("catalog");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0], unnamed);
        assert_eq!(catalog[1].series_id, "s1");
    }

    #[test]
    fn watermarks_lists_row_counts() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        let series = series_row("s1");
        warehouse
            .commit_window(&WindowCommit {
                run_id: "run-1",
                series: &series,
                window_start_ms: 0,
                window_end_ms: 3_000,
                rows: &[
                    MetricRow { ts_ms: 0, fields: vec![Some(1.0)] },
                    MetricRow { ts_ms: 1_000, fields: vec![Some(1.5)] },
                ],
            })
            .expect("commit");

        let listed = warehouse.watermarks().expect("watermarks");
        assert_eq!(
            listed,
            vec![WatermarkRow {
                series_id: "s1".to_string(),
                watermark_ms: 3_000,
                row_count: 2,
            }]
        );
    }
}
