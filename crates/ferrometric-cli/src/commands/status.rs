use ferrometric_core::UtcDateTime;
use serde::Serialize;

use crate::cli::{Cli, OutputFormat, StatusArgs};
use crate::error::{CliError, EXIT_INCOMPLETE};
use crate::output;

use super::open_warehouse;

#[derive(Serialize)]
struct StatusView<'a> {
    series_id: &'a str,
    through: UtcDateTime,
    ingested: bool,
    watermark: Option<UtcDateTime>,
}

/// Exit 0 when the series is ingested through the timestamp, 3 otherwise.
pub fn run(cli: &Cli, args: &StatusArgs) -> Result<u8, CliError> {
    let warehouse = open_warehouse(cli)?;
    let through = UtcDateTime::parse(&args.through)?;

    let watermark = warehouse
        .watermark(&args.series)?
        .map(UtcDateTime::from_unix_millis)
        .transpose()?;
    let ingested = warehouse.is_ingested_through(&args.series, through.unix_millis())?;

    let view = StatusView {
        series_id: &args.series,
        through,
        ingested,
        watermark,
    };
    match cli.format {
        OutputFormat::Json => output::render_json(&view, cli.pretty)?,
        OutputFormat::Table => println!(
            "{} ingested through {}: {} (watermark {})",
            view.series_id,
            view.through,
            if view.ingested { "yes" } else { "no" },
            view.watermark
                .map_or_else(|| String::from("-"), |watermark| watermark.to_string())
        ),
    }

    Ok(if ingested { 0 } else { EXIT_INCOMPLETE })
}
