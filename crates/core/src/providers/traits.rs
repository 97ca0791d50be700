use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::CoreError;
use crate::models::candle::{Candle, CandleInterval};
use crate::models::credential::Credential;
use crate::models::data_kind::DataKind;
use crate::models::holding::Holding;
use crate::models::news::{NewsEvent, Sentiment};
use crate::models::quote::Quote;
use crate::normalize::Normalized;

/// One upstream market-data source.
///
/// Each API (Kite, Yahoo, Alpha Vantage, NewsAPI, OpenAI) implements the
/// operations for the data kinds it serves; the rest keep the default
/// `Unsupported` body. Every operation returns already-normalized entities
/// together with the records that failed normalization.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Stable id used in configuration and provenance ("kite", "yahoo").
    fn id(&self) -> &str;

    /// Human-readable name of this provider (for logs/errors).
    fn name(&self) -> &str;

    /// Which data kinds this provider can serve.
    fn supported_kinds(&self) -> Vec<DataKind>;

    async fn get_holdings(
        &self,
        _credential: Option<&Credential>,
    ) -> Result<Normalized<Holding>, CoreError> {
        Err(CoreError::unsupported(self.id(), "holdings"))
    }

    /// Quotes for canonical `EXCHANGE:SYMBOL` keys.
    async fn get_quotes(
        &self,
        _credential: Option<&Credential>,
        _symbols: &[String],
    ) -> Result<Normalized<Quote>, CoreError> {
        Err(CoreError::unsupported(self.id(), "quotes"))
    }

    async fn get_candles(
        &self,
        _credential: Option<&Credential>,
        _symbol: &str,
        _interval: CandleInterval,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Normalized<Candle>, CoreError> {
        Err(CoreError::unsupported(self.id(), "candles"))
    }

    /// News mentioning `symbol` published at or after `since`.
    async fn get_news(
        &self,
        _symbol: &str,
        _since: DateTime<Utc>,
    ) -> Result<Normalized<NewsEvent>, CoreError> {
        Err(CoreError::unsupported(self.id(), "news"))
    }

    /// One label per input text, in input order.
    async fn classify_sentiment(&self, _texts: &[String]) -> Result<Vec<Sentiment>, CoreError> {
        Err(CoreError::unsupported(self.id(), "sentiment"))
    }
}
