//! Orchestration of one ingestion run.
//!
//! Every series gets its own driver task. A driver walks its series window by
//! window: read the watermark, plan the next window, fetch it through the
//! shared [`HttpClientPool`], parse, persist, repeat until the horizon. Drivers
//! only meet at the rate limiter, which admits them in arrival order, so a
//! series stuck in backoff never holds capacity another series could use.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::client_pool::HttpClientPool;
use crate::config::IngestConfig;
use crate::http_client::{HttpAuth, HttpClient};
use crate::parser;
use crate::provider::ChartEndpoint;
use crate::rate_limiter::RateLimiter;
use crate::report::{IngestReport, SeriesReport, SeriesStatus};
use crate::retry::RetryPolicy;
use crate::store::{MetricStore, RejectedBatch, StoreError, UpsertBatch, UpsertOutcome};
use crate::task::{AttemptFailure, Disposition, FetchTask};
use crate::watermark::WindowPlanner;
use crate::{FetchWindow, IngestError, Series, SeriesId, UtcDateTime};

enum WindowOutcome {
    Persisted(UpsertOutcome),
    Failed(String),
    Cancelled,
}

/// Drives fetch tasks for a set of series against one provider and store.
#[derive(Clone)]
pub struct FetchScheduler {
    pool: HttpClientPool,
    endpoint: ChartEndpoint,
    store: Arc<dyn MetricStore>,
    policy: RetryPolicy,
}

impl FetchScheduler {
    pub fn new(
        pool: HttpClientPool,
        endpoint: ChartEndpoint,
        store: Arc<dyn MetricStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            endpoint,
            store,
            policy,
        }
    }

    /// Wire limiter, pool and endpoint from a validated config.
    pub fn from_config(
        config: &IngestConfig,
        transport: Arc<dyn HttpClient>,
        store: Arc<dyn MetricStore>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit());
        let pool = HttpClientPool::new(transport, limiter, config.request_timeout());
        let endpoint = ChartEndpoint::new(
            config.provider.base_url.clone(),
            config.auth.clone(),
            config.provider.page_size,
        );
        Self::new(pool, endpoint, store, config.retry_policy())
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.endpoint = self.endpoint.with_auth(auth);
        self
    }

    pub fn pool(&self) -> &HttpClientPool {
        &self.pool
    }

    pub fn endpoint(&self) -> &ChartEndpoint {
        &self.endpoint
    }

    /// Catalog reader sharing this scheduler's pool, endpoint and retry policy.
    pub fn catalog(&self, provider: &str) -> Catalog {
        Catalog::new(
            self.pool.clone(),
            self.endpoint.clone(),
            self.policy,
            provider,
        )
    }

    /// Series named by `config`: configured ones first, then every discovered
    /// series not already configured. A configured entry wins over a
    /// discovered one with the same identity.
    pub async fn resolve_series(
        &self,
        config: &IngestConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<Series>>, IngestError> {
        let mut series = config.series_list()?;
        if config.discover.is_empty() {
            return Ok(series);
        }

        let catalog = self.catalog(&config.provider.name);
        let mut known: HashSet<SeriesId> = series.iter().map(|series| series.id().clone()).collect();
        for filter in &config.discover {
            let found = match catalog.discover(filter, cancel).await {
                Ok(found) => found,
                // Drivers observe the same token and report the cancellation.
                Err(error) if error.is_cancelled() => break,
                Err(error) => return Err(error.into()),
            };
            for discovered in found {
                if known.insert(discovered.id().clone()) {
                    series.push(Arc::new(discovered));
                }
            }
        }
        Ok(series)
    }

    /// Ingest every configured and discovered series up to `config.until` (or now).
    pub async fn run_config(
        &self,
        config: &IngestConfig,
        cancel: &CancellationToken,
    ) -> Result<IngestReport, IngestError> {
        let series = self.resolve_series(config, cancel).await?;
        let horizon = config.until.unwrap_or_else(UtcDateTime::now);
        let planner = WindowPlanner::new(config.backfill_start, horizon, config.provider.page_size);
        self.run(series, planner, cancel).await
    }

    /// Ingest `series` up to the planner's horizon.
    ///
    /// Returns `Err` only when the run was aborted; per-series failures and
    /// cancellation are reported in the [`IngestReport`].
    pub async fn run(
        &self,
        series: Vec<Arc<Series>>,
        planner: WindowPlanner,
        cancel: &CancellationToken,
    ) -> Result<IngestReport, IngestError> {
        let run_id = Uuid::new_v4();
        let started_at = UtcDateTime::now();
        let stop = cancel.child_token();

        tracing::info!(
            %run_id,
            series = series.len(),
            horizon = %planner.horizon(),
            "ingest run started"
        );

        let mut slots: Vec<Option<SeriesReport>> = vec![None; series.len()];
        let mut drivers = JoinSet::new();
        for (index, series) in series.into_iter().enumerate() {
            let scheduler = self.clone();
            let stop = stop.clone();
            drivers.spawn(async move {
                let report = scheduler.drive_series(run_id, series, planner, &stop).await;
                (index, report)
            });
        }

        while let Some(joined) = drivers.join_next().await {
            let failure = match joined {
                Ok((index, Ok(report))) => {
                    slots[index] = Some(report);
                    continue;
                }
                Ok((_, Err(error))) => error,
                Err(error) => IngestError::Join(error),
            };

            tracing::error!(%run_id, error = %failure, "aborting ingest run");
            stop.cancel();
            drivers.shutdown().await;
            return Err(failure);
        }

        let report = IngestReport {
            run_id,
            started_at,
            finished_at: UtcDateTime::now(),
            horizon: planner.horizon(),
            series: slots.into_iter().flatten().collect(),
        };
        report.log_summary();
        Ok(report)
    }

    async fn drive_series(
        &self,
        run_id: Uuid,
        series: Arc<Series>,
        planner: WindowPlanner,
        cancel: &CancellationToken,
    ) -> Result<SeriesReport, IngestError> {
        let mut report = SeriesReport::new(series.id().clone());

        loop {
            if cancel.is_cancelled() {
                report.status = SeriesStatus::Cancelled;
                break;
            }

            let watermark = match self.store.watermark(series.id()).await {
                Ok(watermark) => watermark,
                Err(error) => {
                    report.status = self.store_failure(&series, error)?;
                    break;
                }
            };
            report.watermark = watermark;

            let Some(window) = planner.plan(&series, watermark) else {
                report.status = if report.windows_completed > 0 {
                    SeriesStatus::Succeeded
                } else {
                    SeriesStatus::UpToDate
                };
                break;
            };

            match self.run_window(run_id, window, &mut report, cancel).await? {
                WindowOutcome::Persisted(outcome) => {
                    report.windows_completed += 1;
                    report.records_written += outcome.rows_written;
                    report.watermark = Some(outcome.watermark);
                }
                WindowOutcome::Failed(reason) => {
                    tracing::warn!(series = %series, %reason, "series failed");
                    report.status = SeriesStatus::Failed { reason };
                    break;
                }
                WindowOutcome::Cancelled => {
                    tracing::info!(series = %series, "series cancelled");
                    report.status = SeriesStatus::Cancelled;
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn run_window(
        &self,
        run_id: Uuid,
        window: FetchWindow,
        report: &mut SeriesReport,
        cancel: &CancellationToken,
    ) -> Result<WindowOutcome, IngestError> {
        let series_id = window.series().id().clone();
        let mut task = FetchTask::new(window);
        let mut staged: Option<UpsertBatch> = None;

        loop {
            let wait = task.wait_time(Instant::now());
            if !wait.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        task.cancel();
                        return Ok(WindowOutcome::Cancelled);
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            if !task.begin_attempt(Instant::now()) {
                continue;
            }

            let attempt = match staged.take() {
                Some(batch) => self.persist(batch, &mut staged).await,
                None => {
                    report.requests += 1;
                    self.fetch_and_persist(run_id, task.window(), report, &mut staged, cancel)
                        .await
                }
            };

            let failure = match attempt {
                Ok(outcome) => {
                    task.succeed();
                    tracing::info!(
                        series = %series_id,
                        start = %task.window().start(),
                        end = %task.window().end(),
                        rows = outcome.rows_written,
                        attempts = task.attempts(),
                        "window committed"
                    );
                    return Ok(WindowOutcome::Persisted(outcome));
                }
                Err(failure) => failure,
            };

            match task.fail(&failure, &self.policy, Instant::now()) {
                Disposition::Retry { delay, refetch } => {
                    if refetch {
                        staged = None;
                    }
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    report.retries += 1;
                    report.backoff_ms.push(delay_ms);
                    tracing::warn!(
                        series = %series_id,
                        attempt = task.attempts(),
                        delay_ms,
                        error = %failure,
                        "attempt failed, backing off"
                    );
                }
                Disposition::Fail { reason } => return Ok(WindowOutcome::Failed(reason)),
                Disposition::Cancelled => return Ok(WindowOutcome::Cancelled),
                Disposition::Abort => {
                    let source = match failure {
                        AttemptFailure::Store(error) => error,
                        other => StoreError::Integrity(other.to_string()),
                    };
                    return Err(IngestError::Integrity {
                        series_id: series_id.to_string(),
                        source,
                    });
                }
            }
        }
    }

    async fn fetch_and_persist(
        &self,
        run_id: Uuid,
        window: &FetchWindow,
        report: &mut SeriesReport,
        staged: &mut Option<UpsertBatch>,
        cancel: &CancellationToken,
    ) -> Result<UpsertOutcome, AttemptFailure> {
        tracing::debug!(
            series = %window.series(),
            start = %window.start(),
            end = %window.end(),
            "fetching window"
        );

        let payload = self
            .pool
            .fetch(self.endpoint.chart_request(window), cancel)
            .await
            .map_err(AttemptFailure::Fetch)?;
        let parsed = parser::parse(&payload, window).map_err(AttemptFailure::Parse)?;

        for anomaly in &parsed.anomalies {
            tracing::warn!(series = %window.series(), %anomaly, "dropped row");
        }
        report.anomalies += parsed.anomalies.len();

        let batch = UpsertBatch {
            run_id: run_id.to_string(),
            window: window.clone(),
            records: parsed.records,
            fields: parsed.fields,
        };
        self.persist(batch, staged).await
    }

    async fn persist(
        &self,
        batch: UpsertBatch,
        staged: &mut Option<UpsertBatch>,
    ) -> Result<UpsertOutcome, AttemptFailure> {
        match self.store.upsert_and_advance(batch).await {
            Ok(outcome) => Ok(outcome),
            Err(RejectedBatch { error, batch }) => {
                *staged = Some(batch);
                Err(AttemptFailure::Store(error))
            }
        }
    }

    fn store_failure(&self, series: &Series, error: StoreError) -> Result<SeriesStatus, IngestError> {
        if error.is_integrity() {
            return Err(IngestError::Integrity {
                series_id: series.id().to_string(),
                source: error,
            });
        }
        Ok(SeriesStatus::Failed {
            reason: format!("watermark read failed: {error}"),
        })
    }
}
