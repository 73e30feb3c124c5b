use ferrometric_core::UtcDateTime;
use serde_json::json;

use crate::cli::{Cli, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::open_warehouse;

pub fn run(cli: &Cli) -> Result<u8, CliError> {
    let warehouse = open_warehouse(cli)?;
    let rows = warehouse.watermarks()?;

    match cli.format {
        OutputFormat::Json => {
            let mut entries = Vec::with_capacity(rows.len());
            for row in &rows {
                entries.push(json!({
                    "series_id": row.series_id,
                    "watermark": UtcDateTime::from_unix_millis(row.watermark_ms)?,
                    "row_count": row.row_count,
                }));
            }
            output::render_json(&entries, cli.pretty)?;
        }
        OutputFormat::Table => {
            for row in &rows {
                println!(
                    "{:<48} {:<22} rows={}",
                    row.series_id,
                    UtcDateTime::from_unix_millis(row.watermark_ms)?.to_string(),
                    row.row_count
                );
            }
        }
    }

    Ok(0)
}
