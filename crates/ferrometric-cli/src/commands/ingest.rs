//! `ferrometric ingest`: one run, or a run every `--period` seconds.
//!
//! A single run exits with its own code. A periodic loop exits with the code
//! of the last run that finished, unless the interrupt cut a run short.

use std::sync::Arc;
use std::time::Duration;

use ferrometric_core::{IngestReport, MetricStore, UtcDateTime};

use crate::cli::{Cli, IngestArgs};
use crate::error::{CliError, EXIT_INCOMPLETE, EXIT_INTERRUPTED};
use crate::output;

use super::{open_warehouse, Context};

pub async fn run(cli: &Cli, args: &IngestArgs, context: &Context) -> Result<u8, CliError> {
    let mut config = context.load_config(&args.config)?;
    if let Some(until) = &args.until {
        config.until = Some(UtcDateTime::parse(until)?);
        config.validate()?;
    }

    let store: Arc<dyn MetricStore> = Arc::new(open_warehouse(cli)?);
    let scheduler = context.scheduler(&config, store).await?;
    let cancel = context.cancel_token();

    let Some(period) = args.period else {
        let report = scheduler.run_config(&config, cancel).await?;
        output::render_report(&report, cli.format, cli.pretty)?;
        return Ok(exit_code(&report));
    };

    let mut interval = tokio::time::interval(Duration::from_secs(period.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_code = 0;

    tracing::info!(period_secs = period, "periodic ingest started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let report = scheduler.run_config(&config, cancel).await?;
                output::render_report(&report, cli.format, cli.pretty)?;
                last_code = exit_code(&report);
            }
        }
    }
    tracing::info!(exit_code = last_code, "periodic ingest stopped");

    Ok(last_code)
}

/// Failures outrank an interrupt: a failed series needs attention either way.
pub(crate) fn exit_code(report: &IngestReport) -> u8 {
    if report.has_failures() {
        EXIT_INCOMPLETE
    } else if report.was_cancelled() {
        EXIT_INTERRUPTED
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use ferrometric_core::{Resolution, Series, SeriesReport, SeriesStatus};
    use uuid::Uuid;

    use super::*;

    fn report(statuses: &[SeriesStatus]) -> IngestReport {
        let now = UtcDateTime::now();
        let series = statuses
            .iter()
            .enumerate()
            .map(|(index, status)| {
                let chart = format!("c{index}");
                let series = Series::new("cryptoquant", "btc", &chart, None, Resolution::Day, &chart)
                    .expect("series");
                SeriesReport {
                    status: status.clone(),
                    ..SeriesReport::new(series.id().clone())
                }
            })
            .collect();
        IngestReport {
            run_id: Uuid::nil(),
            started_at: now,
            finished_at: now,
            horizon: now,
            series,
        }
    }

    #[test]
    fn interrupted_run_exits_130_unless_a_series_failed() {
        let failed = SeriesStatus::Failed {
            reason: String::from("status 403"),
        };

        assert_eq!(exit_code(&report(&[SeriesStatus::Succeeded])), 0);
        assert_eq!(
            exit_code(&report(&[SeriesStatus::Succeeded, SeriesStatus::Cancelled])),
            EXIT_INTERRUPTED
        );
        assert_eq!(
            exit_code(&report(&[failed.clone(), SeriesStatus::Cancelled])),
            EXIT_INCOMPLETE
        );
        assert_eq!(exit_code(&report(&[failed])), EXIT_INCOMPLETE);
    }
}
