use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::logging::Logger;
use crate::models::aggregated::{AggregatedResult, SourceFailure, Sourced};
use crate::models::candle::{Candle, CandleInterval};
use crate::models::credential::Credential;
use crate::models::data_kind::DataKind;
use crate::models::holding::Holding;
use crate::models::quote::{canonical_symbol, Quote};
use crate::normalize::Normalized;
use crate::providers::registry::ProviderRegistry;
use crate::providers::traits::MarketDataProvider;
use crate::services::aggregator::{merge, rank_of, RankedBatch};
use crate::services::cache::CacheWindow;
use crate::services::fallback::{FallbackChain, Resolution};

/// Holdings, quotes and candles through the fallback chain.
///
/// Cache strategy:
/// - **Quotes**: per symbol; only symbols without a fresh entry go upstream.
/// - **Candles**: per (symbol, interval), holding the last fetched range.
///   A fresh entry whose range covers the request is served without a fetch.
/// - **Holdings**: always fetched; the cache only feeds degraded results.
pub struct MarketService {
    registry: Arc<ProviderRegistry>,
    chain: FallbackChain,
    logger: Arc<dyn Logger>,
    holdings: CacheWindow<Vec<Holding>>,
    quotes: CacheWindow<Sourced<Quote>>,
    candles: CacheWindow<CandleWindow>,
}

/// Candles fetched for one (symbol, interval) and the range they cover.
#[derive(Clone)]
struct CandleWindow {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    source: String,
    candles: Vec<Candle>,
}

impl CandleWindow {
    fn covers(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.from <= from && to <= self.to
    }

    fn within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Candle> {
        self.candles
            .iter()
            .filter(|c| c.timestamp >= from && c.timestamp <= to)
            .cloned()
            .collect()
    }
}

impl MarketService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        chain: FallbackChain,
        logger: Arc<dyn Logger>,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            chain,
            logger,
            holdings: CacheWindow::new(ttl),
            quotes: CacheWindow::new(ttl),
            candles: CacheWindow::new(ttl),
        }
    }

    fn providers(&self, kind: DataKind) -> Result<Vec<Arc<dyn MarketDataProvider>>, CoreError> {
        let providers = self.registry.providers_for(kind);
        if providers.is_empty() {
            return Err(CoreError::NoProvider(kind.to_string()));
        }
        Ok(providers)
    }

    /// Log every dropped record and return how many there were.
    fn report_rejected(&self, request_id: Uuid, provider: &str, rejected: &[CoreError]) -> usize {
        for e in rejected {
            self.logger.error(
                &format!("dropped record: {e}"),
                &[
                    ("request_id", request_id.to_string()),
                    ("provider", provider.to_string()),
                ],
            );
        }
        rejected.len()
    }

    fn report_degraded(&self, request_id: Uuid, what: &str, failures: &[SourceFailure]) {
        let sources = failures
            .iter()
            .map(|f| format!("{}: {}", f.provider, f.message))
            .collect::<Vec<_>>()
            .join("; ");
        self.logger.warn(
            &format!("{what}: all sources failed, returning placeholders"),
            &[("request_id", request_id.to_string()), ("failures", sources)],
        );
    }

    // ── Holdings ────────────────────────────────────────────────────

    pub async fn get_holdings(
        &self,
        credential: Option<&Credential>,
    ) -> Result<AggregatedResult<Holding>, CoreError> {
        let request_id = Uuid::new_v4();
        let providers = self.providers(DataKind::Holdings)?;
        let cache_key = holdings_key(credential);

        let resolution = self
            .chain
            .resolve("holdings", request_id, &providers, |p| async move {
                p.get_holdings(credential).await
            })
            .await?;

        let mut result = match resolution {
            Resolution::Success {
                provider,
                value,
                failures,
            } => {
                let rejected = self.report_rejected(request_id, &provider, &value.rejected);
                self.holdings.put(cache_key, value.items.clone());
                let rank = rank_of_id(&provider, &providers);
                let items = merge(
                    vec![RankedBatch::from_provider(rank, &provider, value.items)],
                    None,
                );
                let mut result = AggregatedResult::success(items);
                result.failures = failures;
                result.rejected = rejected;
                result
            }
            Resolution::Exhausted { failures } => {
                self.report_degraded(request_id, "holdings", &failures);
                let placeholders = self
                    .holdings
                    .last_known(&cache_key)
                    .unwrap_or_default()
                    .into_iter()
                    .map(Sourced::placeholder)
                    .collect();
                let items = merge(vec![RankedBatch::new(0, placeholders)], None);
                AggregatedResult::degraded(items, failures)
            }
        };
        result.request_id = request_id;
        Ok(result)
    }

    // ── Quotes ──────────────────────────────────────────────────────

    /// Quotes for `symbols` (bare symbols default to NSE), sorted by symbol.
    /// Symbols no source serves come back as placeholders.
    pub async fn get_quotes(
        &self,
        credential: Option<&Credential>,
        symbols: &[String],
    ) -> Result<AggregatedResult<Quote>, CoreError> {
        let request_id = Uuid::new_v4();
        let wanted = canonical_symbols(symbols)?;
        let providers = self.providers(DataKind::Quotes)?;
        let priority: Vec<String> = providers.iter().map(|p| p.id().to_string()).collect();

        let mut cached = Vec::new();
        let mut missing = Vec::new();
        for symbol in &wanted {
            match self.quotes.fresh(symbol) {
                Some(hit) => cached.push(hit),
                None => missing.push(symbol.clone()),
            }
        }

        let mut batches = vec![];
        for hit in cached {
            batches.push(RankedBatch::new(rank_of(&hit.source, &priority), vec![hit]));
        }

        if missing.is_empty() {
            let mut result = AggregatedResult::success(merge(batches, None));
            result.request_id = request_id;
            return Ok(result);
        }

        // The winner may omit symbols; those go to the providers after it.
        let mut pending = missing;
        let mut remaining = providers.clone();
        let mut failures = Vec::new();
        let mut rejected = 0;
        let mut served = false;

        while !pending.is_empty() && !remaining.is_empty() {
            let pending_ref = &pending;
            let resolution = self
                .chain
                .resolve("quotes", request_id, &remaining, |p| async move {
                    p.get_quotes(credential, pending_ref).await
                })
                .await?;

            match resolution {
                Resolution::Success {
                    provider,
                    value,
                    failures: skipped,
                } => {
                    failures.extend(skipped);
                    let Normalized { items, rejected: dropped } = value;
                    rejected += self.report_rejected(request_id, &provider, &dropped);

                    let fetched: Vec<Quote> = items
                        .into_iter()
                        .filter(|q| pending.contains(&q.symbol))
                        .collect();
                    for quote in &fetched {
                        self.quotes.put(
                            quote.symbol.clone(),
                            Sourced::from_provider(quote.clone(), provider.as_str()),
                        );
                    }
                    pending.retain(|s| !fetched.iter().any(|q| &q.symbol == s));
                    if !pending.is_empty() {
                        let message = format!("{provider} had no quote for {}", pending.join(", "));
                        self.logger.warn(
                            &format!("quotes: {message}"),
                            &[("request_id", request_id.to_string()), ("provider", provider.clone())],
                        );
                        failures.push(SourceFailure::new(provider.as_str(), message));
                    }

                    served |= !fetched.is_empty();
                    batches.push(RankedBatch::from_provider(
                        rank_of_id(&provider, &providers),
                        &provider,
                        fetched,
                    ));
                    let next = remaining
                        .iter()
                        .position(|p| p.id() == provider)
                        .map_or(remaining.len(), |i| i + 1);
                    remaining = remaining.split_off(next);
                }
                Resolution::Exhausted { failures: exhausted } => {
                    failures.extend(exhausted);
                    break;
                }
            }
        }

        if !pending.is_empty() {
            if served {
                let symbols = pending.join(", ");
                self.logger.warn(
                    &format!("quotes: no source had {symbols}, returning placeholders"),
                    &[("request_id", request_id.to_string())],
                );
            } else {
                self.report_degraded(request_id, "quotes", &failures);
            }
            let placeholders = pending
                .iter()
                .map(|symbol| {
                    let item = self
                        .quotes
                        .last_known(symbol)
                        .map(|s| s.item)
                        .unwrap_or_else(|| Quote::placeholder(symbol));
                    Sourced::placeholder(item)
                })
                .collect();
            batches.push(RankedBatch::new(priority.len(), placeholders));
        }

        let mut result = if served {
            let mut result = AggregatedResult::success(merge(batches, None));
            result.failures = failures;
            result
        } else {
            AggregatedResult::degraded(merge(batches, None), failures)
        };
        result.rejected = rejected;
        result.request_id = request_id;
        Ok(result)
    }

    // ── Candles ─────────────────────────────────────────────────────

    pub async fn get_candles(
        &self,
        credential: Option<&Credential>,
        symbol: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<AggregatedResult<Candle>, CoreError> {
        let request_id = Uuid::new_v4();
        if from >= to {
            return Err(CoreError::Validation(format!(
                "candle range is empty: {from} is not before {to}"
            )));
        }
        let symbol = canonical_symbol(symbol)
            .ok_or_else(|| CoreError::Validation("symbol must not be empty".into()))?;
        let providers = self.providers(DataKind::Candles)?;
        let cache_key = format!("{symbol}|{interval}");

        if let Some(hit) = self.candles.fresh(&cache_key).filter(|w| w.covers(from, to)) {
            let provider = hit.source.clone();
            let rank = rank_of_id(&provider, &providers);
            let items = merge(
                vec![RankedBatch::from_provider(rank, &provider, hit.within(from, to))],
                None,
            );
            let mut result = AggregatedResult::success(items);
            result.request_id = request_id;
            return Ok(result);
        }

        let symbol_ref = symbol.as_str();
        let resolution = self
            .chain
            .resolve("candles", request_id, &providers, |p| async move {
                p.get_candles(credential, symbol_ref, interval, from, to).await
            })
            .await?;

        let mut result = match resolution {
            Resolution::Success {
                provider,
                value,
                failures,
            } => {
                let rejected = self.report_rejected(request_id, &provider, &value.rejected);
                let in_range: Vec<Candle> = value
                    .items
                    .into_iter()
                    .filter(|c| c.timestamp >= from && c.timestamp <= to)
                    .collect();
                self.candles.put(
                    cache_key,
                    CandleWindow {
                        from,
                        to,
                        source: provider.clone(),
                        candles: in_range.clone(),
                    },
                );
                let items = merge(
                    vec![RankedBatch::from_provider(
                        rank_of_id(&provider, &providers),
                        &provider,
                        in_range,
                    )],
                    None,
                );
                let mut result = AggregatedResult::success(items);
                result.failures = failures;
                result.rejected = rejected;
                result
            }
            Resolution::Exhausted { failures } => {
                self.report_degraded(request_id, "candles", &failures);
                let placeholders = self
                    .candles
                    .last_known(&cache_key)
                    .map(|w| w.within(from, to))
                    .unwrap_or_default()
                    .into_iter()
                    .map(Sourced::placeholder)
                    .collect();
                AggregatedResult::degraded(merge(vec![RankedBatch::new(0, placeholders)], None), failures)
            }
        };
        result.request_id = request_id;
        Ok(result)
    }
}

fn rank_of_id(provider: &str, providers: &[Arc<dyn MarketDataProvider>]) -> usize {
    providers
        .iter()
        .position(|p| p.id() == provider)
        .unwrap_or(providers.len())
}

/// Holdings belong to one account; key the cache by the API key.
fn holdings_key(credential: Option<&Credential>) -> String {
    match credential {
        Some(c) => format!("holdings|{}|{}", c.provider, c.api_key),
        None => "holdings|anonymous".to_string(),
    }
}

/// Canonicalize and dedupe caller symbols, keeping first-seen order.
pub fn canonical_symbols(symbols: &[String]) -> Result<Vec<String>, CoreError> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for raw in symbols {
        let symbol = canonical_symbol(raw)
            .ok_or_else(|| CoreError::Validation(format!("invalid symbol {raw:?}")))?;
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    Ok(out)
}
