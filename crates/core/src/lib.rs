pub mod credentials;
pub mod errors;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod providers;
pub mod services;
pub mod storage;
pub mod upstream;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use credentials::{CredentialProvider, CredentialStore};
use logging::{LogFacade, Logger};
use models::{
    aggregated::AggregatedResult,
    analytics::{PortfolioSummary, TechnicalSnapshot},
    candle::{Candle, CandleInterval},
    credential::Credential,
    holding::Holding,
    news::NewsEvent,
    quote::Quote,
    settings::Settings,
};
use providers::registry::ProviderRegistry;
use services::{
    analytics_service::AnalyticsService, fallback::FallbackChain,
    indicator_service::IndicatorService, market_service::MarketService,
    news_service::NewsService,
};

use errors::CoreError;

/// Main entry point for the Portify aggregation layer.
/// Holds the provider registry, the credential source and all services.
#[must_use]
pub struct Portify {
    settings: Settings,
    credentials: Arc<dyn CredentialProvider>,
    market_service: MarketService,
    news_service: NewsService,
    indicator_service: IndicatorService,
    analytics_service: AnalyticsService,
}

impl std::fmt::Debug for Portify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portify")
            .field("provider_order", &self.settings.provider_order)
            .field("cache_ttl_secs", &self.settings.cache_ttl_secs)
            .field("news_limit", &self.settings.news_limit)
            .finish()
    }
}

impl Portify {
    /// Default providers for the configured keys, an in-memory credential
    /// store seeded from the Kite settings, and the `log` facade.
    pub fn new(settings: Settings) -> Self {
        let registry = ProviderRegistry::new_with_defaults(&settings);
        let credentials = Arc::new(CredentialStore::new(settings.kite_credential()));
        Self::with_parts(settings, registry, credentials, Arc::new(LogFacade))
    }

    /// Build from `KITE_API_KEY`, `NEWS_API_KEY`, ... environment variables.
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self::new(Settings::from_env()?))
    }

    /// Assemble from explicit collaborators (custom providers, a persistent
    /// credential store, a host logger).
    pub fn with_parts(
        settings: Settings,
        registry: ProviderRegistry,
        credentials: Arc<dyn CredentialProvider>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let registry = Arc::new(registry);
        let chain = FallbackChain::new(settings.retry_delay(), Arc::clone(&logger));
        let market_service = MarketService::new(
            Arc::clone(&registry),
            chain.clone(),
            Arc::clone(&logger),
            settings.cache_ttl(),
        );
        let news_service = NewsService::new(
            Arc::clone(&registry),
            chain,
            logger,
            settings.news_limit,
            settings.cache_ttl(),
        );
        Self {
            settings,
            credentials,
            market_service,
            news_service,
            indicator_service: IndicatorService::new(),
            analytics_service: AnalyticsService::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    // ── Aggregated queries ──────────────────────────────────────────

    /// Demat holdings, sorted by `EXCHANGE:SYMBOL`.
    pub async fn get_holdings(
        &self,
        credential: Option<&Credential>,
    ) -> Result<AggregatedResult<Holding>, CoreError> {
        self.market_service.get_holdings(credential).await
    }

    /// Quotes for the given symbols, sorted by symbol.
    pub async fn get_quotes(
        &self,
        credential: Option<&Credential>,
        symbols: &[String],
    ) -> Result<AggregatedResult<Quote>, CoreError> {
        self.market_service.get_quotes(credential, symbols).await
    }

    /// News for the given symbols from the last `since_hours`, newest first.
    pub async fn get_news(
        &self,
        symbols: &[String],
        since_hours: u32,
    ) -> Result<AggregatedResult<NewsEvent>, CoreError> {
        self.news_service.get_news(symbols, since_hours).await
    }

    /// Historical candles, oldest first.
    pub async fn get_candles(
        &self,
        credential: Option<&Credential>,
        symbol: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<AggregatedResult<Candle>, CoreError> {
        self.market_service
            .get_candles(credential, symbol, interval, from, to)
            .await
    }

    // ── Analytics ───────────────────────────────────────────────────

    /// RSI, MACD and Bollinger bands over the candle range, with a
    /// BUY/SELL/HOLD vote.
    pub async fn analyze_symbol(
        &self,
        credential: Option<&Credential>,
        symbol: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<TechnicalSnapshot, CoreError> {
        let candles = self
            .get_candles(credential, symbol, interval, from, to)
            .await?;
        let source = candles
            .items
            .first()
            .and_then(|s| s.source.provider())
            .unwrap_or("placeholder")
            .to_string();
        let series: Vec<Candle> = candles.entities().cloned().collect();
        let key = models::quote::canonical_symbol(symbol).unwrap_or_else(|| symbol.to_string());
        self.indicator_service.snapshot(&key, &series, &source)
    }

    /// Totals, P&L, allocation and concentration over current holdings,
    /// with alerts. Headlines for the held symbols feed the news alerts; a
    /// news failure only drops those alerts.
    pub async fn portfolio_summary(
        &self,
        credential: Option<&Credential>,
    ) -> Result<PortfolioSummary, CoreError> {
        let holdings = self.get_holdings(credential).await?;
        let held: Vec<String> = holdings
            .entities()
            .filter(|h| h.quantity > 0)
            .map(|h| h.key())
            .collect();

        let news = if held.is_empty() {
            Vec::new()
        } else {
            match self.get_news(&held, self.settings.alert_news_hours).await {
                Ok(result) => result.entities().cloned().collect(),
                Err(e) => {
                    log::warn!("portfolio alerts without news: {e}");
                    Vec::new()
                }
            }
        };

        Ok(self
            .analytics_service
            .portfolio_summary(&holdings, &news, &self.settings))
    }

    // ── Credential-provider variants ────────────────────────────────

    /// [`Portify::get_holdings`] with the current credential. An
    /// `AuthExpired` from upstream invalidates the stored token.
    pub async fn holdings(&self) -> Result<AggregatedResult<Holding>, CoreError> {
        let credential = self.credentials.current().await;
        let result = self.get_holdings(credential.as_ref()).await;
        self.invalidate_on_auth_error(result).await
    }

    /// [`Portify::get_quotes`] with the current credential.
    pub async fn quotes(&self, symbols: &[String]) -> Result<AggregatedResult<Quote>, CoreError> {
        let credential = self.credentials.current().await;
        let result = self.get_quotes(credential.as_ref(), symbols).await;
        self.invalidate_on_auth_error(result).await
    }

    /// Drop the stored token when a source rejected it, whether or not a
    /// later source covered for it.
    async fn invalidate_on_auth_error<T>(
        &self,
        result: Result<AggregatedResult<T>, CoreError>,
    ) -> Result<AggregatedResult<T>, CoreError> {
        let rejected_by = match &result {
            Err(CoreError::AuthExpired { provider }) => Some(provider.clone()),
            Ok(r) => r
                .failures
                .iter()
                .find(|f| f.requires_login)
                .map(|f| f.provider.clone()),
            Err(_) => None,
        };
        if let Some(provider) = rejected_by {
            log::info!("{provider} rejected the session, invalidating credential");
            self.credentials.invalidate().await;
        }
        result
    }
}
