//! Persistence seam between the scheduler and the warehouse.

use std::future::Future;
use std::pin::Pin;

use ferrometric_warehouse::{MetricRow, SeriesRow, Warehouse, WarehouseError, WindowCommit};
use thiserror::Error;

use crate::{FetchWindow, MetricRecord, Series, SeriesId, UtcDateTime};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage failure, classified by whether retrying is safe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Nothing was committed; the write may be retried.
    #[error("storage contention: {0}")]
    Contention(String),

    /// The store may hold a partial write. Never retried.
    #[error("storage integrity violation: {0}")]
    Integrity(String),
}

impl StoreError {
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

impl From<WarehouseError> for StoreError {
    fn from(error: WarehouseError) -> Self {
        match error {
            WarehouseError::Integrity(message) => Self::Integrity(message),
            other => Self::Contention(other.to_string()),
        }
    }
}

/// Records of one window, staged for an atomic write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertBatch {
    pub run_id: String,
    pub window: FetchWindow,
    pub records: Vec<MetricRecord>,
    /// Field keys of the records' values, empty when only positions are known.
    pub fields: Vec<String>,
}

/// A batch the store refused, handed back so it can be retried without a refetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedBatch {
    pub error: StoreError,
    pub batch: UpsertBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub rows_written: usize,
    pub previous_watermark: Option<UtcDateTime>,
    pub watermark: UtcDateTime,
}

/// Durable record and watermark storage.
///
/// `upsert_and_advance` writes every record of the batch and moves the
/// series watermark to `max(current, window.end)` as one atomic unit.
pub trait MetricStore: Send + Sync {
    fn watermark<'a>(
        &'a self,
        series: &'a SeriesId,
    ) -> StoreFuture<'a, Result<Option<UtcDateTime>, StoreError>>;

    fn upsert_and_advance(
        &self,
        batch: UpsertBatch,
    ) -> StoreFuture<'_, Result<UpsertOutcome, RejectedBatch>>;

    fn is_ingested_through<'a>(
        &'a self,
        series: &'a SeriesId,
        through: UtcDateTime,
    ) -> StoreFuture<'a, Result<bool, StoreError>>;
}

impl MetricStore for Warehouse {
    fn watermark<'a>(
        &'a self,
        series: &'a SeriesId,
    ) -> StoreFuture<'a, Result<Option<UtcDateTime>, StoreError>> {
        Box::pin(async move {
            let warehouse = self.clone();
            let series_id = series.as_str().to_owned();
            let watermark = blocking(move || warehouse.watermark(&series_id)).await?;
            watermark.map(watermark_from_millis).transpose()
        })
    }

    fn upsert_and_advance(
        &self,
        batch: UpsertBatch,
    ) -> StoreFuture<'_, Result<UpsertOutcome, RejectedBatch>> {
        Box::pin(async move {
            let warehouse = self.clone();
            let rows: Vec<MetricRow> = batch
                .records
                .iter()
                .map(|record| MetricRow {
                    ts_ms: record.timestamp.unix_millis(),
                    fields: record.fields.clone(),
                })
                .collect();
            let series = series_row(batch.window.series(), &batch.fields);
            let run_id = batch.run_id.clone();
            let window_start_ms = batch.window.start().unix_millis();
            let window_end_ms = batch.window.end().unix_millis();

            let committed = blocking(move || {
                warehouse.commit_window(&WindowCommit {
                    run_id: &run_id,
                    series: &series,
                    window_start_ms,
                    window_end_ms,
                    rows: &rows,
                })
            })
            .await
            .and_then(|summary| {
                Ok(UpsertOutcome {
                    rows_written: summary.rows_written,
                    previous_watermark: summary
                        .previous_watermark_ms
                        .map(watermark_from_millis)
                        .transpose()?,
                    watermark: watermark_from_millis(summary.watermark_ms)?,
                })
            });

            committed.map_err(|error| RejectedBatch { error, batch })
        })
    }

    fn is_ingested_through<'a>(
        &'a self,
        series: &'a SeriesId,
        through: UtcDateTime,
    ) -> StoreFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let warehouse = self.clone();
            let series_id = series.as_str().to_owned();
            let through_ms = through.unix_millis();
            blocking(move || warehouse.is_ingested_through(&series_id, through_ms)).await
        })
    }
}

/// Catalog row for `series` with its pinned field layout.
pub fn catalog_row(series: &Series) -> SeriesRow {
    series_row(series, &[])
}

/// Catalog row for `series`. Observed payload keys win over the pinned layout
/// they were decoded against, which they equal whenever one is pinned.
fn series_row(series: &Series, observed: &[String]) -> SeriesRow {
    let field_names = if observed.is_empty() {
        series.fields().to_vec()
    } else {
        observed.to_vec()
    };
    SeriesRow {
        series_id: series.id().as_str().to_owned(),
        provider: series.provider().to_owned(),
        asset: series.asset().to_owned(),
        metric: series.metric().to_owned(),
        exchange: series.exchange().map(str::to_owned),
        resolution: series.resolution().as_str().to_owned(),
        chart_id: series.chart_id().to_owned(),
        field_names,
    }
}

fn watermark_from_millis(millis: i64) -> Result<UtcDateTime, StoreError> {
    UtcDateTime::from_unix_millis(millis)
        .map_err(|error| StoreError::Integrity(format!("stored watermark is invalid: {error}")))
}

async fn blocking<T, F>(operation: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, WarehouseError> + Send + 'static,
{
    match tokio::task::spawn_blocking(operation).await {
        Ok(result) => result.map_err(StoreError::from),
        // The closure may have died mid-transaction.
        Err(error) => Err(StoreError::Integrity(format!("storage task failed: {error}"))),
    }
}
