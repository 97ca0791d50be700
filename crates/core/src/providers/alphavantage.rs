use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::CoreError;
use crate::models::credential::Credential;
use crate::models::data_kind::DataKind;
use crate::models::news::{NewsEvent, NewsKind, Sentiment};
use crate::models::quote::{derive_change, split_symbol, Quote};
use crate::normalize::{
    lenient_f64, non_negative, normalize_batch, normalize_value, quantity, require_identity,
    Normalize, NormalizeContext, Normalized,
};
use crate::upstream::{AuthScheme, HttpMethod, Params, UpstreamClient, UpstreamConfig};
use super::traits::MarketDataProvider;

const BASE_URL: &str = "https://www.alphavantage.co";
const PROVIDER_ID: &str = "alphavantage";

/// Alpha Vantage API provider, a quote and news fallback.
///
/// - **Free tier**: 25 requests/day (across ALL endpoints).
/// - **Requires**: API key (set via settings as "alphavantage").
/// - **Quota**: reported as HTTP 200 with a `Note` or `Information` body.
///
/// Indian equities are addressed with the `.BSE` suffix.
pub struct AlphaVantageProvider {
    upstream: UpstreamClient,
    credential: Credential,
}

impl AlphaVantageProvider {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self::with_base_url(api_key, BASE_URL, timeout)
    }

    pub fn with_base_url(api_key: &str, base_url: &str, timeout: Duration) -> Self {
        let config = UpstreamConfig::new(PROVIDER_ID, base_url, AuthScheme::QueryParam("apikey"))
            .with_timeout(timeout)
            .with_quota_signal(quota_signal);
        Self {
            upstream: UpstreamClient::new(config),
            credential: Credential::api_key(PROVIDER_ID, api_key),
        }
    }

    async fn query(&self, params: Vec<(&str, String)>) -> Result<Value, CoreError> {
        let resp = self
            .upstream
            .call("/query", HttpMethod::Get, Params::query(params), Some(&self.credential))
            .await?;
        Ok(resp.body)
    }

    async fn quote_for(&self, symbol: &str) -> Result<Quote, CoreError> {
        let body = self
            .query(vec![
                ("function", "GLOBAL_QUOTE".to_string()),
                ("symbol", to_av_symbol(symbol)),
            ])
            .await?;

        let mut raw = match body {
            Value::Object(mut map) => map
                .remove("Global Quote")
                .ok_or_else(|| CoreError::malformed(PROVIDER_ID, "no Global Quote in response"))?,
            _ => return Err(CoreError::malformed(PROVIDER_ID, "response is not an object")),
        };
        // The upstream symbol carries the .BSE suffix; keep the caller's key.
        if let Some(obj) = raw.as_object_mut() {
            obj.insert("requested".into(), Value::String(symbol.to_string()));
        }
        let ctx = NormalizeContext::new(PROVIDER_ID);
        normalize_value::<GlobalQuote, Quote>(&ctx, raw)
    }
}

/// Alpha Vantage signals an exhausted quota with a 200 and a notice body.
fn quota_signal(body: &Value) -> bool {
    body.get("Note").is_some() || body.get("Information").is_some()
}

/// `NSE:RELIANCE` → `RELIANCE.BSE`.
pub fn to_av_symbol(symbol: &str) -> String {
    let (exchange, tradingsymbol) = split_symbol(symbol);
    match exchange {
        "NSE" | "BSE" => format!("{tradingsymbol}.BSE"),
        _ => tradingsymbol.to_string(),
    }
}

// ── Alpha Vantage API response types ────────────────────────────────

#[derive(Deserialize)]
struct GlobalQuote {
    requested: Option<String>,
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "02. open", default, deserialize_with = "lenient_f64")]
    open: Option<f64>,
    #[serde(rename = "03. high", default, deserialize_with = "lenient_f64")]
    high: Option<f64>,
    #[serde(rename = "04. low", default, deserialize_with = "lenient_f64")]
    low: Option<f64>,
    #[serde(rename = "05. price", default, deserialize_with = "lenient_f64")]
    price: Option<f64>,
    #[serde(rename = "06. volume", default, deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(rename = "08. previous close", default, deserialize_with = "lenient_f64")]
    previous_close: Option<f64>,
    #[serde(rename = "09. change", default, deserialize_with = "lenient_f64")]
    change: Option<f64>,
    #[serde(rename = "10. change percent", default, deserialize_with = "lenient_f64")]
    change_percent: Option<f64>,
}

impl Normalize<Quote> for GlobalQuote {
    fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<Quote, CoreError> {
        // An unknown ticker comes back as an empty object.
        require_identity(ctx, "01. symbol", self.symbol)?;
        let symbol = require_identity(ctx, "symbol", self.requested)?;
        let price = self
            .price
            .ok_or_else(|| ctx.error(format!("{symbol}: no price")))?;
        let last_price = non_negative(ctx, "price", price)?;
        let close = non_negative(ctx, "previous close", self.previous_close.unwrap_or(0.0))?;

        let (change, change_percent) =
            derive_change(last_price, close, self.change, self.change_percent)
                .ok_or_else(|| ctx.error(format!("{symbol}: change disagrees with price")))?;

        Ok(Quote {
            symbol,
            last_price,
            open: self.open.unwrap_or(0.0),
            high: self.high.unwrap_or(0.0),
            low: self.low.unwrap_or(0.0),
            close,
            volume: quantity(ctx, "volume", self.volume.unwrap_or(0.0))?,
            change,
            change_percent,
            timestamp: None,
            instrument_token: None,
        })
    }
}

#[derive(Deserialize)]
struct FeedItem {
    #[serde(default)]
    title: String,
    url: Option<String>,
    time_published: Option<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    source: String,
    overall_sentiment_label: Option<String>,
    /// Set by the provider before normalizing: the symbol that was queried.
    #[serde(default)]
    queried: String,
}

impl Normalize<NewsEvent> for FeedItem {
    fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<NewsEvent, CoreError> {
        let url = require_identity(ctx, "url", self.url)?;
        let published_at = self
            .time_published
            .as_deref()
            .and_then(|t| NaiveDateTime::parse_from_str(t, "%Y%m%dT%H%M%S").ok())
            .map(|t| t.and_utc())
            .ok_or_else(|| ctx.error(format!("{url}: missing or bad time_published")))?;

        Ok(NewsEvent {
            id: NewsEvent::compose_id(ctx.provider, &url),
            kind: NewsKind::classify(&self.title, &self.summary),
            title: self.title,
            description: self.summary,
            url: Some(url),
            published_at,
            source: self.source,
            symbols: vec![self.queried],
            sentiment: self
                .overall_sentiment_label
                .as_deref()
                .and_then(Sentiment::parse_label),
        })
    }
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Alpha Vantage"
    }

    fn supported_kinds(&self) -> Vec<DataKind> {
        vec![DataKind::Quotes, DataKind::News]
    }

    async fn get_quotes(
        &self,
        _credential: Option<&Credential>,
        symbols: &[String],
    ) -> Result<Normalized<Quote>, CoreError> {
        let mut out = Normalized::empty();
        for symbol in symbols {
            match self.quote_for(symbol).await {
                Ok(q) => out.items.push(q),
                Err(e @ CoreError::Normalization { .. }) => out.rejected.push(e),
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    async fn get_news(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Normalized<NewsEvent>, CoreError> {
        let body = self
            .query(vec![
                ("function", "NEWS_SENTIMENT".to_string()),
                ("tickers", to_av_symbol(symbol)),
                ("time_from", since.format("%Y%m%dT%H%M").to_string()),
                ("sort", "LATEST".to_string()),
                ("limit", "50".to_string()),
            ])
            .await?;

        let feed = match body {
            Value::Object(mut map) => match map.remove("feed") {
                Some(Value::Array(items)) => items,
                _ => return Err(CoreError::malformed(PROVIDER_ID, "no feed array")),
            },
            _ => return Err(CoreError::malformed(PROVIDER_ID, "response is not an object")),
        };

        let tagged = feed
            .into_iter()
            .map(|mut item| {
                if let Some(obj) = item.as_object_mut() {
                    obj.insert("queried".into(), Value::String(symbol.to_string()));
                }
                item
            })
            .collect();
        let ctx = NormalizeContext::new(PROVIDER_ID);
        Ok(normalize_batch::<FeedItem, NewsEvent>(&ctx, tagged))
    }
}
