use ferrometric_core::{IngestReport, SeriesStatus};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

pub fn render_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{payload}");
    Ok(())
}

pub fn render_report(report: &IngestReport, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => render_json(report, pretty),
        OutputFormat::Table => {
            println!("run_id     : {}", report.run_id);
            println!("started_at : {}", report.started_at);
            println!("finished_at: {}", report.finished_at);
            println!("horizon    : {}", report.horizon);
            println!(
                "totals     : records={} retries={} anomalies={}",
                report.records_written(),
                report.total_retries(),
                report.anomalies()
            );
            for series in &report.series {
                println!(
                    "{:<48} {:<10} windows={:<4} records={:<8} retries={:<3} watermark={}",
                    series.series_id.as_str(),
                    status_label(&series.status),
                    series.windows_completed,
                    series.records_written,
                    series.retries,
                    series
                        .watermark
                        .map_or_else(|| String::from("-"), |watermark| watermark.to_string()),
                );
                if let SeriesStatus::Failed { reason } = &series.status {
                    println!("    reason: {reason}");
                }
            }
            Ok(())
        }
    }
}

const fn status_label(status: &SeriesStatus) -> &'static str {
    match status {
        SeriesStatus::Succeeded => "succeeded",
        SeriesStatus::UpToDate => "up_to_date",
        SeriesStatus::Failed { .. } => "failed",
        SeriesStatus::Cancelled => "cancelled",
    }
}
