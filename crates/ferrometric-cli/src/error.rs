use ferrometric_core::{ConfigError, IngestError, SignInError, ValidationError};
use ferrometric_warehouse::WarehouseError;
use thiserror::Error;

/// Exit code of a command that ran but left work undone: a series failed or
/// the status check is negative.
pub const EXIT_INCOMPLETE: u8 = 3;

/// Exit code of a run stopped by an interrupt before it finished.
pub const EXIT_INTERRUPTED: u8 = 130;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("ingest run aborted: {0}")]
    Ingest(#[from] IngestError),

    #[error("sign-in failed: {0}")]
    SignIn(#[from] SignInError),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Validation(_) => 2,
            Self::Ingest(IngestError::Config(_)) => 2,
            Self::Ingest(_) => 4,
            Self::SignIn(_) => 5,
            Self::Serialization(_) => 6,
            Self::Logging(_) => 7,
            Self::Warehouse(_) | Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use ferrometric_core::{DiscoveryError, StoreError};

    use super::*;

    #[test]
    fn integrity_abort_exits_with_four() {
        let error = CliError::from(IngestError::Integrity {
            series_id: String::from("cryptoquant/btc/mvrv/all/day"),
            source: StoreError::Integrity(String::from("rollback failed")),
        });
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn discovery_abort_exits_with_four() {
        let error = CliError::from(IngestError::Discovery(DiscoveryError::Malformed {
            url: String::from("https://provider.test/api/v2/assets"),
            detail: String::from("expected a sequence"),
        }));
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn config_errors_exit_with_two() {
        let error = CliError::from(ConfigError::Invalid(String::from("bad")));
        assert_eq!(error.exit_code(), 2);
    }
}
