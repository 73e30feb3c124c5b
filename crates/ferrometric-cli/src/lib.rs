//! # Ferrometric CLI
//!
//! Command definitions and handlers behind the `ferrometric` binary.
//!
//! Handlers take a [`commands::Context`] carrying the provider transport, the
//! secret lookup and the cancellation token, so a whole command can run
//! against a scripted provider. Every handler returns the process exit code:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 2 | Invalid configuration or arguments |
//! | 3 | Some series failed, or the status check is negative |
//! | 4 | Ingest run aborted |
//! | 5 | Sign-in failed |
//! | 6 | Output serialization failed |
//! | 7 | Logging setup failed |
//! | 10 | Warehouse or I/O failure |
//! | 130 | Interrupted before the run finished |

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;

pub use cli::Cli;
pub use commands::Context;
pub use error::CliError;
