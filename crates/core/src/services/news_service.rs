use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use log::debug;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::logging::Logger;
use crate::models::aggregated::{AggregatedResult, SourceFailure, Sourced};
use crate::models::data_kind::DataKind;
use crate::models::news::NewsEvent;
use crate::providers::registry::ProviderRegistry;
use crate::providers::traits::MarketDataProvider;
use crate::services::aggregator::{merge, RankedBatch};
use crate::services::cache::CacheWindow;
use crate::services::fallback::{FallbackChain, Resolution};
use crate::services::market_service::canonical_symbols;

/// Longest look-back accepted for a news query.
pub const MAX_SINCE_HOURS: u32 = 24 * 30;

/// Per-symbol news through the fallback chain, merged across symbols.
///
/// Symbols are queried concurrently; each symbol's chain is sequential.
/// Items without a sentiment label get one from the sentiment chain.
pub struct NewsService {
    registry: Arc<ProviderRegistry>,
    chain: FallbackChain,
    logger: Arc<dyn Logger>,
    limit: usize,
    cache: CacheWindow<(usize, Vec<Sourced<NewsEvent>>)>,
}

/// What one symbol's chain produced.
struct SymbolNews {
    symbol: String,
    rank: usize,
    items: Vec<Sourced<NewsEvent>>,
    failures: Vec<SourceFailure>,
    rejected: usize,
    exhausted: bool,
}

impl NewsService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        chain: FallbackChain,
        logger: Arc<dyn Logger>,
        limit: usize,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            chain,
            logger,
            limit,
            cache: CacheWindow::new(ttl),
        }
    }

    pub async fn get_news(
        &self,
        symbols: &[String],
        since_hours: u32,
    ) -> Result<AggregatedResult<NewsEvent>, CoreError> {
        let request_id = Uuid::new_v4();
        if since_hours == 0 || since_hours > MAX_SINCE_HOURS {
            return Err(CoreError::Validation(format!(
                "since_hours must be between 1 and {MAX_SINCE_HOURS}, got {since_hours}"
            )));
        }
        let symbols = canonical_symbols(symbols)?;
        let providers = self.registry.providers_for(DataKind::News);
        if providers.is_empty() {
            return Err(CoreError::NoProvider(DataKind::News.to_string()));
        }
        let since = Utc::now() - Duration::hours(i64::from(since_hours));

        let per_symbol = join_all(
            symbols
                .iter()
                .map(|symbol| {
                    self.news_for_symbol(request_id, symbol, since_hours, since, &providers)
                }),
        )
        .await;

        let mut batches = Vec::new();
        let mut failures = Vec::new();
        let mut rejected = 0;
        let mut all_exhausted = !symbols.is_empty();

        for outcome in per_symbol {
            let news = outcome?;
            let symbol = news.symbol;
            all_exhausted &= news.exhausted;
            failures.extend(news.failures);
            rejected += news.rejected;
            let items = news
                .items
                .into_iter()
                .filter(|s| s.item.published_at >= since)
                .collect();
            let batch = RankedBatch::new(news.rank, items);
            debug!("news [{request_id}]: {symbol} contributed {}", batch.items.len());
            batches.push(batch);
        }

        let mut items = merge(batches, Some(self.limit));
        self.label_sentiment(request_id, &mut items).await;

        let mut result = if all_exhausted {
            self.logger.warn(
                "news: all sources failed, returning placeholders",
                &[
                    ("request_id", request_id.to_string()),
                    ("failures", failures.len().to_string()),
                ],
            );
            AggregatedResult::degraded(items, failures)
        } else {
            let mut result = AggregatedResult::success(items);
            result.failures = failures;
            result
        };
        result.request_id = request_id;
        result.rejected = rejected;
        Ok(result)
    }

    async fn news_for_symbol(
        &self,
        request_id: Uuid,
        symbol: &str,
        since_hours: u32,
        since: DateTime<Utc>,
        providers: &[Arc<dyn MarketDataProvider>],
    ) -> Result<SymbolNews, CoreError> {
        // Fresh hits must cover the same look-back; last-known is per symbol.
        let cache_key = format!("{symbol}|{since_hours}");
        if let Some((rank, items)) = self.cache.fresh(&cache_key) {
            return Ok(SymbolNews {
                symbol: symbol.to_string(),
                rank,
                items,
                failures: Vec::new(),
                rejected: 0,
                exhausted: false,
            });
        }

        let what = format!("news {symbol}");
        let resolution = self
            .chain
            .resolve(&what, request_id, providers, |p| async move {
                p.get_news(symbol, since).await
            })
            .await?;

        Ok(match resolution {
            Resolution::Success {
                provider,
                value,
                failures,
            } => {
                for e in &value.rejected {
                    self.logger.error(
                        &format!("dropped news item: {e}"),
                        &[
                            ("request_id", request_id.to_string()),
                            ("provider", provider.clone()),
                        ],
                    );
                }
                let rank = providers
                    .iter()
                    .position(|p| p.id() == provider)
                    .unwrap_or(providers.len());
                let items: Vec<Sourced<NewsEvent>> = value
                    .items
                    .into_iter()
                    .map(|n| Sourced::from_provider(n, provider.as_str()))
                    .collect();
                self.cache.put(cache_key, (rank, items.clone()));
                self.cache.put(symbol, (rank, items.clone()));
                SymbolNews {
                    symbol: symbol.to_string(),
                    rank,
                    items,
                    failures,
                    rejected: value.rejected.len(),
                    exhausted: false,
                }
            }
            Resolution::Exhausted { failures } => {
                // Last-known items for this symbol, from any earlier window.
                let items = self
                    .cache
                    .last_known(symbol)
                    .map(|(_, items)| items)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|s| Sourced::placeholder(s.item))
                    .collect();
                SymbolNews {
                    symbol: symbol.to_string(),
                    rank: providers.len(),
                    items,
                    failures,
                    rejected: 0,
                    exhausted: true,
                }
            }
        })
    }

    /// Fill in missing sentiment labels. Failures here never fail the
    /// news request.
    async fn label_sentiment(&self, request_id: Uuid, items: &mut [Sourced<NewsEvent>]) {
        let targets: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, s)| s.item.sentiment.is_none() && !s.source.is_placeholder())
            .map(|(i, _)| i)
            .collect();
        if targets.is_empty() {
            return;
        }
        let providers = self.registry.providers_for(DataKind::Sentiment);
        let texts: Vec<String> = targets
            .iter()
            .map(|&i| format!("{} {}", items[i].item.title, items[i].item.description))
            .collect();

        let texts_ref = &texts;
        let resolution = self
            .chain
            .resolve("sentiment", request_id, &providers, |p| async move {
                p.classify_sentiment(texts_ref).await
            })
            .await;

        match resolution {
            Ok(Resolution::Success { value, .. }) if value.len() == targets.len() => {
                for (i, label) in targets.into_iter().zip(value) {
                    items[i].item.sentiment = Some(label);
                }
            }
            Ok(_) => {}
            Err(e) => self.logger.warn(
                &format!("sentiment labelling skipped: {e}"),
                &[("request_id", request_id.to_string())],
            ),
        }
    }
}
