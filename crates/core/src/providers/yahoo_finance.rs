use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use time::OffsetDateTime;
use yahoo_finance_api::{YResponse, YahooConnector, YahooError};

use crate::errors::{sanitize_message, CoreError};
use crate::models::candle::{Candle, CandleInterval};
use crate::models::credential::Credential;
use crate::models::data_kind::DataKind;
use crate::models::quote::{derive_change, split_symbol, Quote};
use crate::normalize::{non_negative, NormalizeContext, Normalized};
use super::traits::MarketDataProvider;

const PROVIDER_ID: &str = "yahoo";

/// Yahoo Finance provider for NSE/BSE quotes and candles.
///
/// - **Free**: No API key required.
/// - **No strict rate limits** (unofficial public API).
/// - **Coverage**: Indian equities via `.NS`/`.BO` suffixes, indices via `^` tickers.
///
/// Uses the `yahoo_finance_api` crate which wraps Yahoo Finance's
/// public chart endpoint. Quotes are derived from the last two daily bars.
pub struct YahooFinanceProvider {
    connector: YahooConnector,
    timeout: Duration,
}

impl YahooFinanceProvider {
    pub fn new(timeout: Duration) -> Result<Self, CoreError> {
        let connector = YahooConnector::new()
            .map_err(|e| CoreError::malformed(PROVIDER_ID, format!("failed to create connector: {e}")))?;
        Ok(Self { connector, timeout })
    }

    fn to_offset_datetime(dt: DateTime<Utc>) -> Result<OffsetDateTime, CoreError> {
        OffsetDateTime::from_unix_timestamp(dt.timestamp()).map_err(|e| CoreError::Validation(
            format!("timestamp {dt} out of range: {e}"),
        ))
    }

    fn timestamp_to_utc(ts: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(ts, 0)
    }

    /// Run a connector call under the provider timeout.
    async fn bounded<F>(&self, symbol: &str, fut: F) -> Result<YResponse, CoreError>
    where
        F: std::future::Future<Output = Result<YResponse, YahooError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(classify(symbol, &e)),
            Err(_) => Err(CoreError::Transient {
                provider: PROVIDER_ID.into(),
                message: format!("timed out after {:?} for {symbol}", self.timeout),
            }),
        }
    }

    async fn quote_for(&self, symbol: &str) -> Result<Quote, CoreError> {
        let ticker = to_yahoo_symbol(symbol);
        let resp = self
            .bounded(symbol, self.connector.get_latest_quotes(&ticker, "1d"))
            .await?;
        let bars = resp.quotes().map_err(|e| classify(symbol, &e))?;

        let ctx = NormalizeContext::new(PROVIDER_ID);
        let last = bars
            .last()
            .ok_or_else(|| ctx.error(format!("no bars for {symbol}")))?;
        let reference = if bars.len() >= 2 {
            bars[bars.len() - 2].close
        } else {
            last.open
        };

        let last_price = non_negative(&ctx, "close", last.close)?;
        let (change, change_percent) = derive_change(last_price, reference, None, None)
            .ok_or_else(|| ctx.error(format!("{symbol}: inconsistent change")))?;

        Ok(Quote {
            symbol: symbol.to_string(),
            last_price,
            open: last.open,
            high: last.high,
            low: last.low,
            close: reference,
            volume: last.volume,
            change,
            change_percent,
            timestamp: Self::timestamp_to_utc(last.timestamp as i64),
            instrument_token: None,
        })
    }
}

/// Map an `EXCHANGE:SYMBOL` key to a Yahoo ticker.
///
/// NSE → `.NS`, BSE → `.BO`; the two main NSE indices map to their caret tickers.
pub fn to_yahoo_symbol(symbol: &str) -> String {
    let (exchange, tradingsymbol) = split_symbol(symbol);
    match (exchange, tradingsymbol) {
        (_, "NIFTY 50") | (_, "NIFTY") => "^NSEI".to_string(),
        (_, "NIFTY BANK") | (_, "BANKNIFTY") => "^NSEBANK".to_string(),
        (_, "SENSEX") => "^BSESN".to_string(),
        ("NSE", sym) => format!("{sym}.NS"),
        ("BSE", sym) => format!("{sym}.BO"),
        (_, sym) => sym.to_string(),
    }
}

fn classify(symbol: &str, e: &YahooError) -> CoreError {
    let message = sanitize_message(&format!("{symbol}: {e}"));
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("too many") {
        CoreError::QuotaExceeded {
            provider: PROVIDER_ID.into(),
            message,
        }
    } else if lower.contains("404") || lower.contains("no data") || lower.contains("no quotes")
        || lower.contains("no result") || lower.contains("not found")
    {
        CoreError::Rejected {
            provider: PROVIDER_ID.into(),
            status: 404,
            message,
        }
    } else if lower.contains("deserializ") || lower.contains("json") {
        CoreError::malformed(PROVIDER_ID, message)
    } else {
        CoreError::Transient {
            provider: PROVIDER_ID.into(),
            message,
        }
    }
}

#[async_trait]
impl MarketDataProvider for YahooFinanceProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Yahoo Finance"
    }

    fn supported_kinds(&self) -> Vec<DataKind> {
        vec![DataKind::Quotes, DataKind::Candles]
    }

    /// One chart call per symbol. A symbol Yahoo does not know is dropped
    /// as a rejected record; transport failures fail the whole call.
    async fn get_quotes(
        &self,
        _credential: Option<&Credential>,
        symbols: &[String],
    ) -> Result<Normalized<Quote>, CoreError> {
        let mut out = Normalized::empty();
        for symbol in symbols {
            match self.quote_for(symbol).await {
                Ok(quote) => out.items.push(quote),
                Err(e @ (CoreError::Rejected { .. } | CoreError::Normalization { .. })) => {
                    out.rejected.push(e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    async fn get_candles(
        &self,
        _credential: Option<&Credential>,
        symbol: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Normalized<Candle>, CoreError> {
        let start = Self::to_offset_datetime(from)?;
        let end = Self::to_offset_datetime(to)?;
        let ticker = to_yahoo_symbol(symbol);

        let resp = self
            .bounded(
                symbol,
                self.connector
                    .get_quote_history_interval(&ticker, start, end, interval.yahoo_code()),
            )
            .await?;
        let bars = resp.quotes().map_err(|e| classify(symbol, &e))?;

        let ctx = NormalizeContext::new(PROVIDER_ID);
        let mut out = Normalized::empty();
        for bar in bars {
            let candle = Self::timestamp_to_utc(bar.timestamp as i64)
                .ok_or_else(|| ctx.error(format!("bad bar timestamp {}", bar.timestamp)))
                .and_then(|timestamp| {
                    Ok(Candle {
                        timestamp,
                        open: non_negative(&ctx, "open", bar.open)?,
                        high: non_negative(&ctx, "high", bar.high)?,
                        low: non_negative(&ctx, "low", bar.low)?,
                        close: non_negative(&ctx, "close", bar.close)?,
                        volume: bar.volume,
                    })
                });
            out.push(candle);
        }
        Ok(out)
    }
}
