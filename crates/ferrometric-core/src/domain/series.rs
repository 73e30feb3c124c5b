use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_COMPONENT_LEN: usize = 64;

/// Sampling resolution of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[serde(alias = "1h")]
    Hour,
    #[serde(alias = "1d")]
    Day,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// Window name expected by the provider's chart endpoint.
    pub const fn provider_window(self) -> &'static str {
        match self {
            Self::Hour => "HOUR",
            Self::Day => "DAY",
        }
    }

    pub const fn step(self) -> Duration {
        match self {
            Self::Hour => Duration::from_secs(3_600),
            Self::Day => Duration::from_secs(86_400),
        }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" | "1h" => Ok(Self::Hour),
            "day" | "1d" => Ok(Self::Day),
            _ => Err(ValidationError::InvalidResolution {
                value: value.to_owned(),
            }),
        }
    }
}

/// Canonical series key: `provider/asset/metric/exchange/resolution`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(String);

impl SeriesId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SeriesId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SeriesId> for String {
    fn from(value: SeriesId) -> Self {
        value.0
    }
}

/// One logical metric stream of the provider.
///
/// Identity is (provider, asset, metric, exchange, resolution). `chart_id` is
/// the provider's locator for the stream and, like the field layout, does not
/// take part in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    provider: String,
    asset: String,
    metric: String,
    exchange: Option<String>,
    resolution: Resolution,
    chart_id: String,
    /// Value field keys in storage order. Empty when the provider layout is
    /// taken as it comes.
    fields: Vec<String>,
    id: SeriesId,
}

impl Series {
    pub fn new(
        provider: &str,
        asset: &str,
        metric: &str,
        exchange: Option<&str>,
        resolution: Resolution,
        chart_id: &str,
    ) -> Result<Self, ValidationError> {
        let provider = normalize_component("provider", provider)?;
        let asset = normalize_component("asset", asset)?;
        let metric = normalize_component("metric", metric)?;
        let exchange = exchange
            .map(|value| normalize_component("exchange", value))
            .transpose()?;

        let chart_id = chart_id.trim();
        if chart_id.is_empty() {
            return Err(ValidationError::EmptyComponent { field: "chart_id" });
        }

        let id = SeriesId(format!(
            "{provider}/{asset}/{metric}/{}/{resolution}",
            exchange.as_deref().unwrap_or("all")
        ));

        Ok(Self {
            provider,
            asset,
            metric,
            exchange,
            resolution,
            chart_id: chart_id.to_owned(),
            fields: Vec::new(),
            id,
        })
    }

    /// Pin the value field layout. Keys are trimmed; blank and repeated keys
    /// are rejected.
    pub fn with_fields<I, S>(mut self, fields: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = Vec::new();
        for field in fields {
            let key = field.as_ref().trim();
            if key.is_empty() {
                return Err(ValidationError::EmptyComponent { field: "field" });
            }
            if keys.iter().any(|existing| existing == key) {
                return Err(ValidationError::DuplicateField {
                    key: key.to_owned(),
                });
            }
            keys.push(key.to_owned());
        }
        self.fields = keys;
        Ok(self)
    }

    pub fn id(&self) -> &SeriesId {
        &self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    pub const fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn chart_id(&self) -> &str {
        &self.chart_id
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl Display for Series {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.id, f)
    }
}

fn normalize_component(field: &'static str, input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(ValidationError::EmptyComponent { field });
    }

    let len = normalized.chars().count();
    if len > MAX_COMPONENT_LEN {
        return Err(ValidationError::ComponentTooLong {
            field,
            len,
            max: MAX_COMPONENT_LEN,
        });
    }

    for (index, ch) in normalized.chars().enumerate() {
        let valid = ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.');
        if !valid {
            return Err(ValidationError::ComponentInvalidChar { field, ch, index });
        }
    }

    Ok(normalized)
}
