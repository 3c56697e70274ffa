//! Market price lookups used inside workers
//!
//! `GET <base>/price?name=<n>&currency=<c>` answering
//! `{ "lowest_price": .., "median_price": .., "volume": .. }`. Marketplaces
//! commonly send prices as display strings ("$1,234.56", "1,23€"), so both
//! numbers and strings are accepted.

use crate::config::PriceApiConfig;
use crate::store::PricePoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PriceLookupError {
    #[error("price request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("no listing for '{name}'")]
    NotFound { name: String },

    #[error("price API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("price API rate limited the request")]
    RateLimited,

    #[error("malformed price response: {0}")]
    Decode(String),

    #[error("price client misconfigured: {0}")]
    Configuration(String),
}

/// Raw quote for one item
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PriceQuote {
    #[serde(default, deserialize_with = "deserialize_price")]
    pub lowest_price: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub median_price: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_volume")]
    pub volume: Option<u64>,
}

impl PriceQuote {
    /// Median price, else lowest; `None` when the quote carries neither
    pub fn to_price_point(&self, at: DateTime<Utc>) -> Option<PricePoint> {
        let price = self.median_price.or(self.lowest_price)?;
        Some(PricePoint {
            price,
            volume: self.volume,
            updated_at: at,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn deserialize_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        None => None,
        Some(NumberOrString::Number(n)) => Some(n).filter(|n| n.is_finite()),
        Some(NumberOrString::Text(text)) => parse_display_price(&text),
    })
}

fn deserialize_volume<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        None => None,
        Some(NumberOrString::Number(n)) if n >= 0.0 && n.is_finite() => Some(n as u64),
        Some(NumberOrString::Number(_)) => None,
        Some(NumberOrString::Text(text)) => {
            let digits: String = text.chars().filter(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
    })
}

/// Parse a display price such as `$1,234.56`, `1.234,56€` or `12,50 zł`
///
/// The last `.` or `,` followed by one or two digits is the decimal
/// separator; every other separator groups thousands.
pub fn parse_display_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let decimal_at = cleaned
        .rfind(['.', ','])
        .filter(|&idx| (1..=2).contains(&(cleaned.len() - idx - 1)));

    let normalized: String = match decimal_at {
        Some(idx) => {
            let (whole, fraction) = cleaned.split_at(idx);
            let whole: String = whole.chars().filter(char::is_ascii_digit).collect();
            format!("{}.{}", whole, &fraction[1..])
        }
        None => cleaned.chars().filter(char::is_ascii_digit).collect(),
    };
    normalized.parse().ok()
}

/// Source of market prices
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn quote(&self, name: &str, currency: &str) -> Result<PriceQuote, PriceLookupError>;
}

/// HTTP price API client
pub struct PriceClient {
    client: Client,
    endpoint: String,
    request_delay: Duration,
}

impl std::fmt::Debug for PriceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceClient")
            .field("endpoint", &self.endpoint)
            .field("request_delay", &self.request_delay)
            .finish()
    }
}

impl PriceClient {
    pub fn new(config: &PriceApiConfig) -> Result<Self, PriceLookupError> {
        let base = config.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(PriceLookupError::Configuration(
                "price_api.base_url is empty".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                PriceLookupError::Configuration(format!("invalid price API key: {e}"))
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("pricefeed-worker/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                PriceLookupError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{base}/price"),
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    /// Pause to keep between consecutive lookups
    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }
}

#[async_trait]
impl PriceSource for PriceClient {
    async fn quote(&self, name: &str, currency: &str) -> Result<PriceQuote, PriceLookupError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", name), ("currency", currency)])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let body = response.text().await?;
                let quote: PriceQuote = serde_json::from_str(&body)
                    .map_err(|e| PriceLookupError::Decode(e.to_string()))?;
                debug!(name = name, median = ?quote.median_price, "Price quote received");
                Ok(quote)
            }
            StatusCode::NOT_FOUND => Err(PriceLookupError::NotFound {
                name: name.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(PriceLookupError::RateLimited),
            status => Err(PriceLookupError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
