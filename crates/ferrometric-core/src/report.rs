use serde::Serialize;
use uuid::Uuid;

use crate::{SeriesId, UtcDateTime};

/// Terminal outcome of one series within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeriesStatus {
    /// At least one window was persisted and the series reached the horizon.
    Succeeded,
    /// Nothing to fetch; the watermark already covers the horizon.
    UpToDate,
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesReport {
    pub series_id: SeriesId,
    #[serde(flatten)]
    pub status: SeriesStatus,
    pub windows_completed: u32,
    pub records_written: usize,
    pub requests: u32,
    pub retries: u32,
    /// Every backoff wait taken, in order.
    pub backoff_ms: Vec<u64>,
    pub anomalies: usize,
    pub watermark: Option<UtcDateTime>,
}

impl SeriesReport {
    pub fn new(series_id: SeriesId) -> Self {
        Self {
            series_id,
            status: SeriesStatus::UpToDate,
            windows_completed: 0,
            records_written: 0,
            requests: 0,
            retries: 0,
            backoff_ms: Vec::new(),
            anomalies: 0,
            watermark: None,
        }
    }
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub horizon: UtcDateTime,
    pub series: Vec<SeriesReport>,
}

impl IngestReport {
    pub fn records_written(&self) -> usize {
        self.series.iter().map(|series| series.records_written).sum()
    }

    pub fn total_retries(&self) -> u32 {
        self.series.iter().map(|series| series.retries).sum()
    }

    pub fn anomalies(&self) -> usize {
        self.series.iter().map(|series| series.anomalies).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.series
            .iter()
            .any(|series| matches!(series.status, SeriesStatus::Failed { .. }))
    }

    pub fn was_cancelled(&self) -> bool {
        self.series
            .iter()
            .any(|series| series.status == SeriesStatus::Cancelled)
    }

    pub fn series(&self, series_id: &str) -> Option<&SeriesReport> {
        self.series
            .iter()
            .find(|series| series.series_id.as_str() == series_id)
    }

    /// Log the per-series outcome and run totals.
    pub fn log_summary(&self) {
        for series in &self.series {
            tracing::info!(
                run_id = %self.run_id,
                series = %series.series_id,
                status = ?series.status,
                windows = series.windows_completed,
                records = series.records_written,
                requests = series.requests,
                retries = series.retries,
                anomalies = series.anomalies,
                watermark = ?series.watermark.map(|watermark| watermark.to_string()),
                "series finished"
            );
        }

        tracing::info!(
            run_id = %self.run_id,
            series = self.series.len(),
            records = self.records_written(),
            retries = self.total_retries(),
            anomalies = self.anomalies(),
            failed = self.has_failures(),
            "ingest run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Resolution, Series};

    fn report(status: SeriesStatus, records: usize, retries: u32) -> SeriesReport {
        let series = Series::new("cryptoquant", "btc", "mvrv", None, Resolution::Day, "c1")
            .expect("series");
        SeriesReport {
            status,
            records_written: records,
            retries,
            ..SeriesReport::new(series.id().clone())
        }
    }

    fn ingest(series: Vec<SeriesReport>) -> IngestReport {
        let now = UtcDateTime::from_unix_millis(0).expect("ts");
        IngestReport {
            run_id: Uuid::nil(),
            started_at: now,
            finished_at: now,
            horizon: now,
            series,
        }
    }

    #[test]
    fn totals_aggregate_series() {
        let report = ingest(vec![
            report(SeriesStatus::Succeeded, 3, 2),
            report(SeriesStatus::UpToDate, 0, 0),
        ]);
        assert_eq!(report.records_written(), 3);
        assert_eq!(report.total_retries(), 2);
        assert!(!report.has_failures());
    }

    #[test]
    fn failed_series_flags_report() {
        let report = ingest(vec![report(
            SeriesStatus::Failed {
                reason: String::from("status 403"),
            },
            0,
            0,
        )]);
        assert!(report.has_failures());
    }

    #[test]
    fn status_serializes_flat() {
        let json = serde_json::to_value(report(
            SeriesStatus::Failed {
                reason: String::from("boom"),
            },
            0,
            0,
        ))
        .expect("json");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");
        assert_eq!(json["series_id"], "cryptoquant/btc/mvrv/all/day");
    }
}
