//! Window planning from stored watermarks.

use std::sync::Arc;

use crate::{FetchWindow, Series, UtcDateTime};

/// Plans the next window of a series from its watermark.
///
/// Windows start at the watermark (or the backfill start for a series never
/// ingested), span at most `page_size` periods and stop at the horizon. The
/// horizon is floored to the series resolution so an unfinished period is
/// never covered by a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlanner {
    backfill_start: UtcDateTime,
    horizon: UtcDateTime,
    page_size: u32,
}

impl WindowPlanner {
    pub fn new(backfill_start: UtcDateTime, horizon: UtcDateTime, page_size: u32) -> Self {
        Self {
            backfill_start,
            horizon,
            page_size: page_size.max(1),
        }
    }

    pub const fn horizon(&self) -> UtcDateTime {
        self.horizon
    }

    /// The window after `watermark`, or `None` when the series is up to date.
    pub fn plan(&self, series: &Arc<Series>, watermark: Option<UtcDateTime>) -> Option<FetchWindow> {
        let step = series.resolution().step();
        let horizon = self.horizon.floor_to(step);
        let start = watermark.unwrap_or_else(|| self.backfill_start.floor_to(step));
        if start >= horizon {
            return None;
        }

        let end = start
            .checked_add(step * self.page_size)
            .map_or(horizon, |end| end.min(horizon));
        FetchWindow::new(Arc::clone(series), start, end).ok()
    }
}
