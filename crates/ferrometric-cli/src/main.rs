use std::process::ExitCode;

use clap::Parser;
use ferrometric_cli::{commands, logging, Cli, CliError, Context};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            tracing::error!(%error, "command failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<u8, CliError> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format)?;

    commands::run(&cli, &Context::process()).await
}
