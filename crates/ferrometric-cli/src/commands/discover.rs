//! `ferrometric discover`: resolve the series a run would cover and register
//! them in the warehouse catalog without fetching any values.

use std::sync::Arc;

use ferrometric_core::{catalog_row, MetricStore};
use ferrometric_warehouse::SeriesRow;

use crate::cli::{Cli, DiscoverArgs, OutputFormat};
use crate::error::{CliError, EXIT_INTERRUPTED};
use crate::output;

use super::{open_warehouse, Context};

pub async fn run(cli: &Cli, args: &DiscoverArgs, context: &Context) -> Result<u8, CliError> {
    let config = context.load_config(&args.config)?;
    let warehouse = open_warehouse(cli)?;
    let store: Arc<dyn MetricStore> = Arc::new(warehouse.clone());
    let scheduler = context.scheduler(&config, store).await?;

    let series = scheduler
        .resolve_series(&config, context.cancel_token())
        .await?;
    if context.cancel_token().is_cancelled() {
        return Ok(EXIT_INTERRUPTED);
    }

    let rows: Vec<SeriesRow> = series.iter().map(|series| catalog_row(series)).collect();
    let registered = warehouse.register_series(&rows)?;
    tracing::info!(series = registered, "series registered");

    match cli.format {
        OutputFormat::Json => output::render_json(&rows, cli.pretty)?,
        OutputFormat::Table => {
            for row in &rows {
                println!(
                    "{:<48} chart={:<26} fields={}",
                    row.series_id,
                    row.chart_id,
                    if row.field_names.is_empty() {
                        String::from("-")
                    } else {
                        row.field_names.join(",")
                    }
                );
            }
        }
    }

    Ok(0)
}
