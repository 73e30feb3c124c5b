use std::sync::Arc;

use serde::Serialize;

use crate::{Series, SeriesId, UtcDateTime, ValidationError};

/// One observation of a series.
///
/// `(series_id, timestamp)` is unique in storage; later writes overwrite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub series_id: SeriesId,
    pub timestamp: UtcDateTime,
    /// Field values in provider order; `None` marks a missing value.
    pub fields: Vec<Option<f64>>,
}

/// Half-open time range `[start, end)` of one series, requested in a single call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchWindow {
    series: Arc<Series>,
    start: UtcDateTime,
    end: UtcDateTime,
}

impl FetchWindow {
    pub fn new(
        series: Arc<Series>,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        if end <= start {
            return Err(ValidationError::EmptyWindow {
                start: start.format_rfc3339(),
                end: end.format_rfc3339(),
            });
        }

        Ok(Self { series, start, end })
    }

    pub fn series(&self) -> &Arc<Series> {
        &self.series
    }

    pub const fn start(&self) -> UtcDateTime {
        self.start
    }

    pub const fn end(&self) -> UtcDateTime {
        self.end
    }

    pub fn contains(&self, timestamp: UtcDateTime) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}
