use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::client_pool::{FetchError, HttpClientPool};
use crate::http_client::{HttpAuth, HttpRequest};
use crate::FetchWindow;

/// Observations per request accepted by the chart endpoint.
pub const DEFAULT_PAGE_SIZE: u32 = 70_000;

/// Request builder for the provider's chart API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartEndpoint {
    base_url: String,
    auth: HttpAuth,
    page_size: u32,
}

impl ChartEndpoint {
    pub fn new(base_url: impl Into<String>, auth: HttpAuth, page_size: u32) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth,
            page_size: page_size.max(1),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Build the chart request for one window. The provider's `to` bound is
    /// inclusive, so the window end is shifted back by one millisecond.
    pub fn chart_request(&self, window: &FetchWindow) -> HttpRequest {
        let series = window.series();
        let url = format!(
            "{}/api/v3/charts/{}?window={}&from={}&to={}&limit={}",
            self.base_url,
            urlencoding::encode(series.chart_id()),
            series.resolution().provider_window(),
            window.start().unix_millis(),
            window.end().unix_millis() - 1,
            self.page_size,
        );

        HttpRequest::get(url)
            .with_header("accept", "application/json")
            .with_auth(&self.auth)
    }

    /// Every asset the provider lists.
    pub fn assets_request(&self) -> HttpRequest {
        self.catalog_get(format!("{}/api/v2/assets", self.base_url))
    }

    /// Metric categories of one asset, by the asset's provider id.
    pub fn asset_metrics_request(&self, asset_id: &str) -> HttpRequest {
        self.catalog_get(format!(
            "{}/api/v2/assets/{}/metrics",
            self.base_url,
            urlencoding::encode(asset_id)
        ))
    }

    /// Field definitions, windows and charts of one asset metric.
    pub fn metric_charts_request(&self, metric_id: &str) -> HttpRequest {
        self.catalog_get(format!(
            "{}/api/v3/metrics/{}/charts",
            self.base_url,
            urlencoding::encode(metric_id)
        ))
    }

    fn catalog_get(&self, url: String) -> HttpRequest {
        HttpRequest::get(url)
            .with_header("accept", "application/json")
            .with_auth(&self.auth)
    }

    /// Exchange account credentials for an access token.
    pub async fn sign_in(
        &self,
        pool: &HttpClientPool,
        email: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionTokens, SignInError> {
        let body = serde_json::to_string(&SignInRequest {
            email,
            password,
            stay_logged_in: true,
        })
        .map_err(|error| SignInError::Malformed(error.to_string()))?;

        let request = HttpRequest::post_json(format!("{}/api/v1/sign-in", self.base_url), body);
        let payload = pool.fetch(request, cancel).await?;

        serde_json::from_str::<SessionTokens>(payload.body())
            .map_err(|error| SignInError::Malformed(error.to_string()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    stay_logged_in: bool,
}

/// Tokens returned by a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl SessionTokens {
    pub fn bearer(&self) -> HttpAuth {
        HttpAuth::BearerToken(self.access_token.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unexpected sign-in response: {0}")]
    Malformed(String),
}
