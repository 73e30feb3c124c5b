//! Domain models for ingested metric series.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Series`] | Identity of one metric stream |
//! | [`SeriesId`] | Canonical series key |
//! | [`Resolution`] | Sampling resolution (hour, day) |
//! | [`MetricRecord`] | One timestamped observation |
//! | [`FetchWindow`] | Half-open range requested in one call |
//! | [`UtcDateTime`] | UTC timestamp with RFC3339 serialization |

mod record;
mod series;
mod timestamp;

pub use record::{FetchWindow, MetricRecord};
pub use series::{Resolution, Series, SeriesId};
pub use timestamp::UtcDateTime;
