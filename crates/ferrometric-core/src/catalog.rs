//! Discovery of chart series from the provider catalog.
//!
//! The provider lists assets, the metric categories of each asset and the
//! charts of each asset metric. A [`CatalogFilter`] narrows each level by
//! path; an empty list keeps the whole level.
//!
//! Charts of one metric differ by dimension keys (exchange, miner, symbol and
//! so on). When a dimension is not filtered and some chart of the metric
//! carries that dimension's aggregate key (`all_exchange`, `all_miner`,
//! `all_symbol`), only the aggregate charts are kept. The exchange dimension
//! can be filtered explicitly; the others always follow the aggregate rule.
//!
//! Every discovered series carries the metric's field keys as its pinned
//! layout.

use std::collections::HashSet;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client_pool::{FetchError, HttpClientPool};
use crate::http_client::HttpRequest;
use crate::provider::ChartEndpoint;
use crate::retry::RetryPolicy;
use crate::task::MAX_RETRY_DELAY;
use crate::{Resolution, Series, SeriesId};

/// Which catalog entries become series.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFilter {
    /// Asset paths, e.g. `btc`.
    #[serde(default)]
    pub assets: Vec<String>,
    /// Metric category paths, e.g. `flow-indicator`.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Metric paths, e.g. `exchange-reserve`.
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Exchange keys. Empty selects the aggregate chart where there is one.
    #[serde(default)]
    pub exchanges: Vec<String>,
    pub resolution: Resolution,
}

impl CatalogFilter {
    /// Everything the provider offers at `resolution`.
    pub const fn everything(resolution: Resolution) -> Self {
        Self {
            assets: Vec::new(),
            categories: Vec::new(),
            metrics: Vec::new(),
            exchanges: Vec::new(),
            resolution,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("catalog request {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("unexpected catalog response from {url}: {detail}")]
    Malformed { url: String, detail: String },
}

impl DiscoveryError {
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Fetch {
                source: FetchError::Cancelled,
                ..
            }
        )
    }
}

#[derive(Debug, Deserialize)]
struct AssetEntry {
    id: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct AssetMetricEntry {
    category: CategoryEntry,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    path: String,
    #[serde(default)]
    metrics: Vec<MetricEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricEntry {
    path: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    metric_id: Option<String>,
}

impl MetricEntry {
    fn provider_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.metric_id.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricCharts {
    #[serde(default)]
    metric_fields: Vec<FieldEntry>,
    #[serde(default)]
    windows: Vec<String>,
    #[serde(default)]
    charts: Vec<ChartEntry>,
}

#[derive(Debug, Deserialize)]
struct FieldEntry {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartEntry {
    id: String,
    #[serde(default)]
    exchange: Option<DimensionKey>,
    #[serde(default)]
    miner: Option<DimensionKey>,
    #[serde(default)]
    from_miner: Option<DimensionKey>,
    #[serde(default)]
    to_miner: Option<DimensionKey>,
    #[serde(default)]
    market: Option<DimensionKey>,
    #[serde(default)]
    from_exchange: Option<DimensionKey>,
    #[serde(default)]
    to_exchange: Option<DimensionKey>,
    #[serde(default)]
    from_bank: Option<DimensionKey>,
    #[serde(default)]
    symbol: Option<DimensionKey>,
}

#[derive(Debug, Deserialize)]
struct DimensionKey {
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Exchange,
    Miner,
    FromMiner,
    ToMiner,
    Market,
    FromExchange,
    ToExchange,
    FromBank,
    Symbol,
}

impl Dimension {
    const ALL: [Self; 9] = [
        Self::Exchange,
        Self::Miner,
        Self::FromMiner,
        Self::ToMiner,
        Self::Market,
        Self::FromExchange,
        Self::ToExchange,
        Self::FromBank,
        Self::Symbol,
    ];

    fn key(self, chart: &ChartEntry) -> Option<&str> {
        let dimension = match self {
            Self::Exchange => &chart.exchange,
            Self::Miner => &chart.miner,
            Self::FromMiner => &chart.from_miner,
            Self::ToMiner => &chart.to_miner,
            Self::Market => &chart.market,
            Self::FromExchange => &chart.from_exchange,
            Self::ToExchange => &chart.to_exchange,
            Self::FromBank => &chart.from_bank,
            Self::Symbol => &chart.symbol,
        };
        dimension.as_ref().and_then(|dimension| dimension.key.as_deref())
    }

    fn is_aggregate(self, key: &str) -> bool {
        match self {
            Self::Exchange | Self::FromExchange => key == "all_exchange",
            Self::Miner | Self::FromMiner | Self::ToMiner => key == "all_miner",
            Self::ToExchange => matches!(key, "spot_exchange" | "derivative_exchange"),
            Self::Symbol => key == "all_symbol",
            Self::Market | Self::FromBank => false,
        }
    }
}

/// Charts of one metric that the filter keeps.
fn select_charts<'a>(charts: &'a [ChartEntry], exchanges: &[String]) -> Vec<&'a ChartEntry> {
    let aggregated: Vec<Dimension> = Dimension::ALL
        .into_iter()
        .filter(|dimension| {
            charts
                .iter()
                .filter_map(|chart| dimension.key(chart))
                .any(|key| dimension.is_aggregate(key))
        })
        .collect();

    charts
        .iter()
        .filter(|chart| {
            Dimension::ALL.into_iter().all(|dimension| {
                let Some(key) = dimension.key(chart) else {
                    return true;
                };
                if dimension == Dimension::Exchange && !exchanges.is_empty() {
                    return exchanges.iter().any(|wanted| wanted.eq_ignore_ascii_case(key));
                }
                !aggregated.contains(&dimension) || dimension.is_aggregate(key)
            })
        })
        .collect()
}

/// Keep `entries` whose path is listed in `wanted`, in `wanted` order. An
/// empty `wanted` keeps everything.
fn pick<'a, T>(
    entries: &'a [T],
    wanted: &'a [String],
    path: impl Fn(&T) -> &str,
) -> Vec<Result<&'a T, &'a str>> {
    if wanted.is_empty() {
        return entries.iter().map(Ok).collect();
    }
    wanted
        .iter()
        .map(|name| {
            entries
                .iter()
                .find(|entry| path(entry).eq_ignore_ascii_case(name))
                .ok_or(name.as_str())
        })
        .collect()
}

/// Reads the provider catalog through the shared client pool.
#[derive(Clone)]
pub struct Catalog {
    pool: HttpClientPool,
    endpoint: ChartEndpoint,
    policy: RetryPolicy,
    provider: String,
}

impl Catalog {
    pub fn new(
        pool: HttpClientPool,
        endpoint: ChartEndpoint,
        policy: RetryPolicy,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            endpoint,
            policy,
            provider: provider.into(),
        }
    }

    /// Series matching `filter`, in catalog order, without duplicates.
    pub async fn discover(
        &self,
        filter: &CatalogFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Series>, DiscoveryError> {
        let assets: Vec<AssetEntry> = self.fetch_json(self.endpoint.assets_request(), cancel).await?;

        let mut seen: HashSet<SeriesId> = HashSet::new();
        let mut discovered = Vec::new();
        for asset in pick(&assets, &filter.assets, |asset| asset.path.as_str()) {
            let asset = match asset {
                Ok(asset) => asset,
                Err(missing) => {
                    tracing::warn!(asset = missing, "asset not in provider catalog");
                    continue;
                }
            };

            let categories: Vec<AssetMetricEntry> = self
                .fetch_json(self.endpoint.asset_metrics_request(&asset.id), cancel)
                .await?;
            let categories: Vec<CategoryEntry> =
                categories.into_iter().map(|entry| entry.category).collect();

            for category in pick(&categories, &filter.categories, |category| category.path.as_str()) {
                let Ok(category) = category else {
                    continue;
                };
                for metric in pick(&category.metrics, &filter.metrics, |metric| metric.path.as_str()) {
                    let Ok(metric) = metric else {
                        continue;
                    };
                    let Some(metric_id) = metric.provider_id() else {
                        tracing::warn!(asset = %asset.path, metric = %metric.path, "metric has no id");
                        continue;
                    };

                    let charts: MetricCharts = self
                        .fetch_json(self.endpoint.metric_charts_request(metric_id), cancel)
                        .await?;
                    for series in self.metric_series(&asset.path, &metric.path, &charts, filter) {
                        if seen.insert(series.id().clone()) {
                            discovered.push(series);
                        }
                    }
                }
            }
        }

        tracing::info!(
            provider = %self.provider,
            series = discovered.len(),
            "catalog discovery finished"
        );
        Ok(discovered)
    }

    fn metric_series(
        &self,
        asset: &str,
        metric: &str,
        charts: &MetricCharts,
        filter: &CatalogFilter,
    ) -> Vec<Series> {
        let window = filter.resolution.provider_window();
        if !charts.windows.is_empty()
            && !charts.windows.iter().any(|offered| offered.eq_ignore_ascii_case(window))
        {
            tracing::debug!(asset, metric, window, "metric not offered at resolution");
            return Vec::new();
        }

        let fields = charts.metric_fields.iter().map(|field| field.key.as_str());
        select_charts(&charts.charts, &filter.exchanges)
            .into_iter()
            .filter_map(|chart| {
                let built = Series::new(
                    &self.provider,
                    asset,
                    metric,
                    Dimension::Exchange.key(chart),
                    filter.resolution,
                    &chart.id,
                )
                .and_then(|series| series.with_fields(fields.clone()));
                match built {
                    Ok(series) => Some(series),
                    Err(error) => {
                        tracing::warn!(asset, metric, chart = %chart.id, %error, "skipping chart");
                        None
                    }
                }
            })
            .collect()
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<T, DiscoveryError> {
        let url = request.url.clone();
        let mut failures = 0;
        loop {
            let error = match self.pool.fetch(request.clone(), cancel).await {
                Ok(payload) => {
                    return serde_json::from_str(payload.body()).map_err(|error| {
                        DiscoveryError::Malformed {
                            url,
                            detail: error.to_string(),
                        }
                    });
                }
                Err(error) => error,
            };

            failures += 1;
            if !error.is_retryable() || !self.policy.allows_another(failures) {
                return Err(DiscoveryError::Fetch { url, source: error });
            }

            let delay = self.retry_delay(failures, &error);
            tracing::warn!(
                %url,
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %error,
                "catalog request failed, backing off"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DiscoveryError::Fetch {
                        url,
                        source: FetchError::Cancelled,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn retry_delay(&self, failures: u32, error: &FetchError) -> Duration {
        let delay = match error {
            FetchError::RateLimitedByServer { retry_after } => {
                self.policy.throttle_delay(failures, *retry_after)
            }
            _ => self.policy.backoff.delay(failures),
        };
        delay.min(MAX_RETRY_DELAY)
    }
}
