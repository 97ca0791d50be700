use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::CoreError;
use crate::models::candle::{Candle, CandleInterval};
use crate::models::credential::Credential;
use crate::models::data_kind::DataKind;
use crate::models::holding::Holding;
use crate::models::quote::{canonical_symbol, derive_change, Quote};
use crate::normalize::{
    non_negative, normalize_batch, quantity, require_identity, value_to_f64, Normalize,
    NormalizeContext, Normalized,
};
use crate::upstream::{AuthScheme, HttpMethod, Params, UpstreamClient, UpstreamConfig};
use super::traits::MarketDataProvider;

const BASE_URL: &str = "https://api.kite.trade";
const PROVIDER_ID: &str = "kite";

/// Kite accepts at most this many instruments per `/quote` call.
const QUOTE_BATCH: usize = 500;

/// Zerodha Kite Connect provider: the user's broker.
///
/// - **Requires**: API key plus a daily access token (expires 06:00 IST).
/// - **Serves**: demat holdings, full quotes, historical candles.
/// - **Auth**: `X-Kite-Version: 3` and `Authorization: token key:token`.
///
/// The only source of holdings; first choice for quotes and candles.
pub struct KiteProvider {
    upstream: UpstreamClient,
}

impl KiteProvider {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(BASE_URL, timeout)
    }

    /// Point at a different host (sandbox or a local mock server).
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Self {
        let config = UpstreamConfig::new(PROVIDER_ID, base_url, AuthScheme::KiteToken)
            .with_timeout(timeout);
        Self {
            upstream: UpstreamClient::new(config),
        }
    }

    /// Unwrap Kite's `{"status": "success", "data": ...}` envelope.
    fn data(body: Value) -> Result<Value, CoreError> {
        if body.get("status").and_then(Value::as_str) == Some("error") {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(CoreError::malformed(PROVIDER_ID, message));
        }
        match body {
            Value::Object(mut map) => map
                .remove("data")
                .filter(|d| !d.is_null())
                .ok_or_else(|| CoreError::malformed(PROVIDER_ID, "response has no data")),
            _ => Err(CoreError::malformed(PROVIDER_ID, "response is not an object")),
        }
    }

    async fn fetch_quotes(
        &self,
        credential: Option<&Credential>,
        symbols: &[String],
    ) -> Result<Normalized<Quote>, CoreError> {
        let ctx = NormalizeContext::new(PROVIDER_ID);
        let mut out = Normalized::empty();

        for chunk in symbols.chunks(QUOTE_BATCH) {
            let params = Params::query(chunk.iter().map(|s| ("i", s.as_str())));
            let resp = self
                .upstream
                .call("/quote", HttpMethod::Get, params, credential)
                .await?;

            let Value::Object(entries) = Self::data(resp.body)? else {
                return Err(CoreError::malformed(PROVIDER_ID, "quote data is not a map"));
            };

            // The instrument key only lives in the map key; fold it into the record.
            let raw: Vec<Value> = entries
                .into_iter()
                .map(|(key, mut value)| {
                    if let Some(obj) = value.as_object_mut() {
                        obj.insert("key".into(), Value::String(key));
                    }
                    value
                })
                .collect();
            out.extend(normalize_batch::<KiteQuote, Quote>(&ctx, raw));
        }
        Ok(out)
    }
}

// ── Kite API response types ─────────────────────────────────────────

#[derive(Deserialize)]
struct KiteHolding {
    tradingsymbol: Option<String>,
    exchange: Option<String>,
    isin: Option<String>,
    #[serde(default)]
    quantity: f64,
    #[serde(default)]
    t1_quantity: f64,
    #[serde(default)]
    average_price: f64,
    #[serde(default)]
    last_price: f64,
    #[serde(default)]
    close_price: f64,
    #[serde(default)]
    pnl: f64,
    #[serde(default)]
    day_change: f64,
    #[serde(default)]
    day_change_percentage: f64,
}

impl Normalize<Holding> for KiteHolding {
    fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<Holding, CoreError> {
        let tradingsymbol = require_identity(ctx, "tradingsymbol", self.tradingsymbol)?;
        let exchange = require_identity(ctx, "exchange", self.exchange)?;
        Ok(Holding {
            tradingsymbol: tradingsymbol.to_uppercase(),
            exchange: exchange.to_uppercase(),
            isin: self.isin.filter(|i| !i.is_empty()),
            quantity: quantity(ctx, "quantity", self.quantity + self.t1_quantity)?,
            average_price: non_negative(ctx, "average_price", self.average_price)?,
            last_price: non_negative(ctx, "last_price", self.last_price)?,
            close_price: non_negative(ctx, "close_price", self.close_price)?,
            pnl: self.pnl,
            day_change: self.day_change,
            day_change_percentage: self.day_change_percentage,
        })
    }
}

#[derive(Deserialize, Default)]
struct KiteOhlc {
    #[serde(default)]
    open: f64,
    #[serde(default)]
    high: f64,
    #[serde(default)]
    low: f64,
    #[serde(default)]
    close: f64,
}

#[derive(Deserialize)]
struct KiteQuote {
    key: Option<String>,
    instrument_token: Option<u64>,
    timestamp: Option<String>,
    last_price: Option<f64>,
    #[serde(default)]
    volume: f64,
    net_change: Option<f64>,
    #[serde(default)]
    ohlc: KiteOhlc,
}

impl Normalize<Quote> for KiteQuote {
    fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<Quote, CoreError> {
        let key = require_identity(ctx, "instrument key", self.key)?;
        let symbol =
            canonical_symbol(&key).ok_or_else(|| ctx.error(format!("bad instrument key {key:?}")))?;
        let last_price = non_negative(ctx, "last_price", self.last_price.unwrap_or(0.0))?;
        let close = non_negative(ctx, "ohlc.close", self.ohlc.close)?;

        let (change, change_percent) = derive_change(last_price, close, self.net_change, None)
            .ok_or_else(|| ctx.error(format!("{symbol}: net_change disagrees with last/close")))?;

        Ok(Quote {
            symbol,
            last_price,
            open: self.ohlc.open,
            high: self.ohlc.high,
            low: self.ohlc.low,
            close,
            volume: quantity(ctx, "volume", self.volume)?,
            change,
            change_percent,
            timestamp: self.timestamp.as_deref().and_then(parse_ist_timestamp),
            instrument_token: self.instrument_token,
        })
    }
}

/// `[timestamp, open, high, low, close, volume, (oi)]`
#[derive(Deserialize)]
struct KiteCandle(Vec<Value>);

impl Normalize<Candle> for KiteCandle {
    fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<Candle, CoreError> {
        let row = self.0;
        if row.len() < 6 {
            return Err(ctx.error(format!("candle row has {} fields", row.len())));
        }
        let timestamp = row[0]
            .as_str()
            .and_then(|s| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z").ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| ctx.error("candle has no valid timestamp"))?;

        let field = |i: usize, name: &str| {
            value_to_f64(&row[i]).ok_or_else(|| ctx.error(format!("candle {name} is not a number")))
        };
        Ok(Candle {
            timestamp,
            open: non_negative(ctx, "open", field(1, "open")?)?,
            high: non_negative(ctx, "high", field(2, "high")?)?,
            low: non_negative(ctx, "low", field(3, "low")?)?,
            close: non_negative(ctx, "close", field(4, "close")?)?,
            volume: quantity(ctx, "volume", field(5, "volume")?)?,
        })
    }
}

/// Kite quote timestamps are exchange-local ("2024-03-15 15:29:59").
fn parse_ist_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60)?;
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()?;
    ist.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl MarketDataProvider for KiteProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Zerodha Kite"
    }

    fn supported_kinds(&self) -> Vec<DataKind> {
        vec![DataKind::Holdings, DataKind::Quotes, DataKind::Candles]
    }

    async fn get_holdings(
        &self,
        credential: Option<&Credential>,
    ) -> Result<Normalized<Holding>, CoreError> {
        let resp = self
            .upstream
            .call("/portfolio/holdings", HttpMethod::Get, Params::None, credential)
            .await?;

        let Value::Array(rows) = Self::data(resp.body)? else {
            return Err(CoreError::malformed(PROVIDER_ID, "holdings data is not a list"));
        };
        let ctx = NormalizeContext::new(PROVIDER_ID);
        Ok(normalize_batch::<KiteHolding, Holding>(&ctx, rows))
    }

    async fn get_quotes(
        &self,
        credential: Option<&Credential>,
        symbols: &[String],
    ) -> Result<Normalized<Quote>, CoreError> {
        self.fetch_quotes(credential, symbols).await
    }

    async fn get_candles(
        &self,
        credential: Option<&Credential>,
        symbol: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Normalized<Candle>, CoreError> {
        // Historical data is keyed by instrument token, which only /quote exposes.
        let quotes = self.fetch_quotes(credential, &[symbol.to_string()]).await?;
        let token = quotes
            .items
            .iter()
            .find(|q| q.symbol == symbol)
            .and_then(|q| q.instrument_token)
            .ok_or_else(|| CoreError::Rejected {
                provider: PROVIDER_ID.into(),
                status: 404,
                message: format!("no instrument token for {symbol}"),
            })?;

        let fmt = "%Y-%m-%d %H:%M:%S";
        let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60)
            .ok_or_else(|| CoreError::malformed(PROVIDER_ID, "invalid IST offset"))?;
        let params = Params::query([
            ("from", from.with_timezone(&ist).format(fmt).to_string()),
            ("to", to.with_timezone(&ist).format(fmt).to_string()),
        ]);
        let endpoint = format!("/instruments/historical/{token}/{}", interval.kite_code());
        let resp = self
            .upstream
            .call(&endpoint, HttpMethod::Get, params, credential)
            .await?;

        let rows = match Self::data(resp.body)? {
            Value::Object(mut map) => match map.remove("candles") {
                Some(Value::Array(rows)) => rows,
                _ => return Err(CoreError::malformed(PROVIDER_ID, "no candles array")),
            },
            _ => return Err(CoreError::malformed(PROVIDER_ID, "candle data is not an object")),
        };
        let ctx = NormalizeContext::new(PROVIDER_ID);
        Ok(normalize_batch::<KiteCandle, Candle>(&ctx, rows))
    }
}

