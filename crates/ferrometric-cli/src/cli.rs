//! CLI argument definitions for ferrometric.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingest` | Fetch configured series into the warehouse, once or periodically |
//! | `discover` | Resolve configured and catalog series and register them |
//! | `watermarks` | List stored watermarks and row counts |
//! | `status` | Check whether a series is ingested through a timestamp |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--db` | `ferrometric.duckdb` | Warehouse file |
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `info` | Log level when `RUST_LOG` is unset |
//! | `--log-format` | `text` | Log format on stderr (text, json) |
//!
//! # Examples
//!
//! ```bash
//! # One run up to now
//! FERROMETRIC_TOKEN=... ferrometric ingest --config ingest.toml
//!
//! # Re-run every hour until interrupted
//! ferrometric ingest --config ingest.toml --period 3600
//!
//! # Which series would a run cover?
//! ferrometric discover --config ingest.toml --format table
//!
//! # Has the series been ingested through 2024-06-01?
//! ferrometric status cryptoquant/btc/mvrv/all/day 2024-06-01
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "ferrometric",
    author,
    version,
    about = "Rate-limited ingestion of market metric charts into DuckDB"
)]
pub struct Cli {
    /// Warehouse database file.
    #[arg(long, global = true, default_value = "ferrometric.duckdb")]
    pub db: PathBuf,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch configured series into the warehouse.
    Ingest(IngestArgs),
    /// Resolve configured and catalog series and register them in the warehouse.
    Discover(DiscoverArgs),
    /// List stored watermarks.
    Watermarks,
    /// Check whether a series is ingested through a timestamp.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Run configuration (TOML).
    #[arg(long, short)]
    pub config: PathBuf,

    /// Repeat the run every N seconds until interrupted.
    #[arg(long)]
    pub period: Option<u64>,

    /// Override the run horizon (RFC3339 UTC or YYYY-MM-DD).
    #[arg(long)]
    pub until: Option<String>,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Run configuration (TOML).
    #[arg(long, short)]
    pub config: PathBuf,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Series id, e.g. cryptoquant/btc/mvrv/all/day.
    pub series: String,

    /// Timestamp (RFC3339 UTC or YYYY-MM-DD).
    pub through: String,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ingest_with_global_options() {
        let cli = Cli::try_parse_from([
            "ferrometric",
            "ingest",
            "--config",
            "ingest.toml",
            "--period",
            "60",
            "--db",
            "data/metrics.duckdb",
            "--log-format",
            "json",
        ])
        .expect("parse");

        assert_eq!(cli.db, PathBuf::from("data/metrics.duckdb"));
        assert_eq!(cli.log_format, LogFormat::Json);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.period, Some(60));
        assert_eq!(args.config, PathBuf::from("ingest.toml"));
    }
}
