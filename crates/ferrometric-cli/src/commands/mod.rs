mod discover;
mod ingest;
mod status;
mod watermarks;

use std::path::Path;
use std::sync::Arc;

use ferrometric_core::{
    FetchScheduler, HttpAuth, HttpClient, IngestConfig, MetricStore, ReqwestHttpClient,
};
use ferrometric_warehouse::{Warehouse, WarehouseConfig};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Command};
use crate::error::CliError;

type SecretLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// What a command reads from outside its arguments.
#[derive(Clone)]
pub struct Context {
    transport: Option<Arc<dyn HttpClient>>,
    secrets: Arc<SecretLookup>,
    cancel: CancellationToken,
}

impl Context {
    /// Network transport, process environment and a token cancelled on Ctrl-C.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn process() -> Self {
        let context = Self::new(CancellationToken::new());
        watch_interrupt(context.cancel.clone());
        context
    }

    /// Network transport and process environment, cancelled through `cancel`.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            transport: None,
            secrets: Arc::new(|name: &str| std::env::var(name).ok()),
            cancel,
        }
    }

    /// Send provider requests through `transport` instead of the network.
    pub fn with_transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Read secrets from `lookup` instead of the process environment.
    pub fn with_secrets(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.secrets = Arc::new(lookup);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn load_config(&self, path: &Path) -> Result<IngestConfig, CliError> {
        Ok(IngestConfig::load(path)?.with_secrets(|name| (self.secrets)(name)))
    }

    fn transport(&self, config: &IngestConfig) -> Arc<dyn HttpClient> {
        match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(ReqwestHttpClient::new(config.limits.max_in_flight)),
        }
    }

    /// Scheduler for `config`, signed in when the config carries credentials.
    async fn scheduler(
        &self,
        config: &IngestConfig,
        store: Arc<dyn MetricStore>,
    ) -> Result<FetchScheduler, CliError> {
        let scheduler = FetchScheduler::from_config(config, self.transport(config), store);
        if let Some(credentials) = &config.credentials {
            tracing::info!(username = %credentials.username, "signing in");
            let tokens = scheduler
                .endpoint()
                .sign_in(
                    scheduler.pool(),
                    &credentials.username,
                    &credentials.password,
                    &self.cancel,
                )
                .await?;
            return Ok(scheduler.with_auth(tokens.bearer()));
        }
        if config.auth == HttpAuth::None {
            tracing::warn!("no provider credentials configured, requests are unauthenticated");
        }
        Ok(scheduler)
    }
}

/// Run the parsed command and return its exit code.
pub async fn run(cli: &Cli, context: &Context) -> Result<u8, CliError> {
    match &cli.command {
        Command::Ingest(args) => ingest::run(cli, args, context).await,
        Command::Discover(args) => discover::run(cli, args, context).await,
        Command::Watermarks => watermarks::run(cli),
        Command::Status(args) => status::run(cli, args),
    }
}

fn open_warehouse(cli: &Cli) -> Result<Warehouse, CliError> {
    Ok(Warehouse::open(WarehouseConfig::file(&cli.db))?)
}

fn watch_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after in-flight writes");
            cancel.cancel();
        }
    });
}
