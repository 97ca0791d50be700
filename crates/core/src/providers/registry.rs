use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::models::data_kind::DataKind;
use crate::models::settings::Settings;

use super::alphavantage::AlphaVantageProvider;
use super::keyword_sentiment::KeywordSentimentProvider;
use super::kite::KiteProvider;
use super::newsapi::NewsApiProvider;
use super::openai::OpenAiProvider;
use super::traits::MarketDataProvider;
use super::yahoo_finance::YahooFinanceProvider;

/// Registry of all available upstream providers.
///
/// Routes requests to providers by `DataKind`, in the priority order
/// configured in `Settings.provider_order`. New providers can be added
/// without touching the services.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    order: HashMap<DataKind, Vec<String>>,
}

impl ProviderRegistry {
    /// Create an empty registry that uses registration order.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            order: HashMap::new(),
        }
    }

    /// Empty registry that orders providers per `settings.provider_order`.
    pub fn with_order(settings: &Settings) -> Self {
        let mut registry = Self::new();
        for kind in DataKind::ALL {
            if let Some(ids) = settings.order_for(kind) {
                registry.order.insert(kind, ids.to_vec());
            }
        }
        registry
    }

    /// Create a registry with every default provider whose keys are configured.
    pub fn new_with_defaults(settings: &Settings) -> Self {
        let mut registry = Self::with_order(settings);

        // Kite: holdings, quotes, candles; the access token arrives per call
        if settings.kite_credential().is_some() {
            registry.register(Arc::new(KiteProvider::new(settings.timeout_for("kite"))));
        }

        // Yahoo Finance: quotes and candles, NO API key needed
        if let Ok(yahoo) = YahooFinanceProvider::new(settings.timeout_for("yahoo")) {
            registry.register(Arc::new(yahoo));
        }

        // Alpha Vantage: quotes and news, requires API key (fallback)
        if let Some(key) = settings.api_key("alphavantage") {
            registry.register(Arc::new(AlphaVantageProvider::new(
                key,
                settings.timeout_for("alphavantage"),
            )));
        }

        // NewsAPI: news, requires API key
        if let Some(key) = settings.api_key("newsapi") {
            registry.register(Arc::new(NewsApiProvider::new(
                key,
                settings.timeout_for("newsapi"),
            )));
        }

        // OpenAI: headline sentiment, requires API key
        if let Some(key) = settings.api_key("openai") {
            registry.register(Arc::new(OpenAiProvider::new(
                key,
                &settings.openai_model,
                settings.timeout_for("openai"),
            )));
        }

        // Keyword heuristics: sentiment of last resort, always available
        registry.register(Arc::new(KeywordSentimentProvider));

        debug!("registered providers: {:?}", registry.provider_ids());
        registry
    }

    /// Register a new provider.
    pub fn register(&mut self, provider: Arc<dyn MarketDataProvider>) {
        self.providers.push(provider);
    }

    /// Override the priority list for one kind.
    pub fn set_order(&mut self, kind: DataKind, ids: Vec<String>) {
        self.order.insert(kind, ids);
    }

    /// All providers serving `kind`, in priority order: configured ids
    /// first, in configured order, then any others in registration order.
    pub fn providers_for(&self, kind: DataKind) -> Vec<Arc<dyn MarketDataProvider>> {
        let serving: Vec<&Arc<dyn MarketDataProvider>> = self
            .providers
            .iter()
            .filter(|p| p.supported_kinds().contains(&kind))
            .collect();

        let mut ordered: Vec<Arc<dyn MarketDataProvider>> = Vec::with_capacity(serving.len());
        if let Some(ids) = self.order.get(&kind) {
            for id in ids {
                if let Some(p) = serving.iter().find(|p| p.id() == id.as_str()) {
                    if !ordered.iter().any(|o| o.id() == p.id()) {
                        ordered.push(Arc::clone(*p));
                    }
                }
            }
        }
        for p in serving {
            if !ordered.iter().any(|o| o.id() == p.id()) {
                ordered.push(Arc::clone(p));
            }
        }
        ordered
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
