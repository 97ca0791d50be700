// ═══════════════════════════════════════════════════════════════════
// Service Tests — FallbackChain, merge, CacheWindow, MarketService,
// NewsService, IndicatorService, AnalyticsService
// ═══════════════════════════════════════════════════════════════════

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use portify_core::errors::CoreError;
use portify_core::logging::{render, Logger};
use portify_core::models::aggregated::{AggregatedResult, Provenance, Sourced};
use portify_core::models::analytics::{
    AlertKind, AlertSeverity, BollingerBands, Macd, PortfolioSummary, Signal,
};
use portify_core::models::candle::{Candle, CandleInterval};
use portify_core::models::credential::Credential;
use portify_core::models::data_kind::DataKind;
use portify_core::models::holding::Holding;
use portify_core::models::news::{NewsEvent, NewsKind, Sentiment};
use portify_core::models::quote::Quote;
use portify_core::models::settings::Settings;
use portify_core::normalize::Normalized;
use portify_core::providers::keyword_sentiment::KeywordSentimentProvider;
use portify_core::providers::registry::ProviderRegistry;
use portify_core::providers::traits::MarketDataProvider;
use portify_core::services::aggregator::{merge, rank_of, RankedBatch};
use portify_core::services::analytics_service::AnalyticsService;
use portify_core::services::cache::CacheWindow;
use portify_core::services::fallback::{FallbackChain, Resolution};
use portify_core::services::indicator_service::{bollinger, ema, macd, rsi, vote, IndicatorService};
use portify_core::services::market_service::{canonical_symbols, MarketService};
use portify_core::services::news_service::NewsService;

// ═══════════════════════════════════════════════════════════════════
// Mock Provider
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum Failure {
    Transient,
    AuthExpired,
    Quota,
    Malformed,
}

impl Failure {
    fn error(self, provider: &str) -> CoreError {
        let provider = provider.to_string();
        match self {
            Failure::Transient => CoreError::Transient {
                provider,
                message: "simulated timeout".into(),
            },
            Failure::AuthExpired => CoreError::AuthExpired { provider },
            Failure::Quota => CoreError::QuotaExceeded {
                provider,
                message: "simulated quota".into(),
            },
            Failure::Malformed => CoreError::MalformedResponse {
                provider,
                message: "simulated garbage".into(),
            },
        }
    }
}

/// Scripted provider: fails on the listed call numbers, otherwise serves
/// its fixed data. Records every call.
struct MockProvider {
    id: &'static str,
    kinds: Vec<DataKind>,
    calls: AtomicUsize,
    fail_first: Vec<Failure>,
    fail_from: Option<(usize, Failure)>,
    rejected: usize,
    holdings: Vec<Holding>,
    quotes: Vec<Quote>,
    candles: Vec<Candle>,
    news: Vec<NewsEvent>,
    label: Option<Sentiment>,
    requested: Mutex<Vec<Vec<String>>>,
}

impl MockProvider {
    fn new(id: &'static str, kinds: &[DataKind]) -> Self {
        Self {
            id,
            kinds: kinds.to_vec(),
            calls: AtomicUsize::new(0),
            fail_first: Vec::new(),
            fail_from: None,
            rejected: 0,
            holdings: Vec::new(),
            quotes: Vec::new(),
            candles: Vec::new(),
            news: Vec::new(),
            label: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    fn holdings(mut self, holdings: Vec<Holding>) -> Self {
        self.holdings = holdings;
        self
    }

    fn quotes(mut self, quotes: Vec<Quote>) -> Self {
        self.quotes = quotes;
        self
    }

    fn candles(mut self, candles: Vec<Candle>) -> Self {
        self.candles = candles;
        self
    }

    fn news(mut self, news: Vec<NewsEvent>) -> Self {
        self.news = news;
        self
    }

    fn label(mut self, label: Sentiment) -> Self {
        self.label = Some(label);
        self
    }

    fn failing_first(mut self, failures: &[Failure]) -> Self {
        self.fail_first = failures.to_vec();
        self
    }

    fn always(self, failure: Failure) -> Self {
        self.failing_from(0, failure)
    }

    fn failing_from(mut self, call: usize, failure: Failure) -> Self {
        self.fail_from = Some((call, failure));
        self
    }

    fn rejecting(mut self, n: usize) -> Self {
        self.rejected = n;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn requested(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }

    fn next_failure(&self) -> Option<CoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((from, failure)) = self.fail_from {
            if n >= from {
                return Some(failure.error(self.id));
            }
        }
        self.fail_first.get(n).map(|f| f.error(self.id))
    }

    fn respond<T>(&self, items: Vec<T>) -> Result<Normalized<T>, CoreError> {
        if let Some(e) = self.next_failure() {
            return Err(e);
        }
        let mut out = Normalized::new(items);
        for i in 0..self.rejected {
            out.rejected.push(CoreError::Normalization {
                provider: self.id.into(),
                message: format!("record {i} has no tradingsymbol"),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.id
    }

    fn supported_kinds(&self) -> Vec<DataKind> {
        self.kinds.clone()
    }

    async fn get_holdings(
        &self,
        _credential: Option<&Credential>,
    ) -> Result<Normalized<Holding>, CoreError> {
        self.respond(self.holdings.clone())
    }

    async fn get_quotes(
        &self,
        _credential: Option<&Credential>,
        symbols: &[String],
    ) -> Result<Normalized<Quote>, CoreError> {
        self.requested.lock().unwrap().push(symbols.to_vec());
        let matching = self
            .quotes
            .iter()
            .filter(|q| symbols.contains(&q.symbol))
            .cloned()
            .collect();
        self.respond(matching)
    }

    async fn get_candles(
        &self,
        _credential: Option<&Credential>,
        _symbol: &str,
        _interval: CandleInterval,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Normalized<Candle>, CoreError> {
        self.respond(self.candles.clone())
    }

    async fn get_news(
        &self,
        symbol: &str,
        _since: DateTime<Utc>,
    ) -> Result<Normalized<NewsEvent>, CoreError> {
        // Tag with the queried symbol only, the way real adapters do.
        let matching = self
            .news
            .iter()
            .filter(|n| n.symbols.iter().any(|s| s == symbol))
            .map(|n| NewsEvent {
                symbols: vec![symbol.to_string()],
                ..n.clone()
            })
            .collect();
        self.respond(matching)
    }

    async fn classify_sentiment(&self, texts: &[String]) -> Result<Vec<Sentiment>, CoreError> {
        if let Some(e) = self.next_failure() {
            return Err(e);
        }
        Ok(self
            .label
            .map(|l| vec![l; texts.len()])
            .unwrap_or_default())
    }
}

/// Captures everything the services log.
#[derive(Default)]
struct RecordingLogger {
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingLogger {
    fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Logger for RecordingLogger {
    fn warn(&self, message: &str, context: &[(&str, String)]) {
        self.warnings
            .lock()
            .unwrap()
            .push(format!("{message}{}", render(context)));
    }

    fn error(&self, message: &str, context: &[(&str, String)]) {
        self.errors
            .lock()
            .unwrap()
            .push(format!("{message}{}", render(context)));
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

fn quote(symbol: &str, price: f64) -> Quote {
    Quote {
        last_price: price,
        close: price,
        ..Quote::placeholder(symbol)
    }
}

fn holding(symbol: &str, qty: u64, avg: f64, last: f64, day_pct: f64) -> Holding {
    Holding {
        quantity: qty,
        average_price: avg,
        last_price: last,
        close_price: last,
        day_change_percentage: day_pct,
        ..Holding::placeholder("NSE", symbol)
    }
}

fn candle(day: u32, close: f64) -> Candle {
    Candle {
        timestamp: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000,
    }
}

fn article(id: &str, hours_ago: i64, symbols: &[&str]) -> NewsEvent {
    NewsEvent {
        id: id.into(),
        kind: NewsKind::News,
        title: format!("Shares surge on {id}"),
        description: String::new(),
        url: Some(format!("https://example.com/{id}")),
        published_at: Utc::now() - chrono::Duration::hours(hours_ago),
        source: "Mint".into(),
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        sentiment: None,
    }
}

fn syms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn dyns(providers: &[&Arc<MockProvider>]) -> Vec<Arc<dyn MarketDataProvider>> {
    providers
        .iter()
        .map(|p| Arc::clone(*p) as Arc<dyn MarketDataProvider>)
        .collect()
}

fn registry(providers: &[&Arc<MockProvider>]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for p in dyns(providers) {
        registry.register(p);
    }
    registry
}

fn chain(logger: &Arc<RecordingLogger>) -> FallbackChain {
    FallbackChain::new(Duration::ZERO, Arc::clone(logger) as Arc<dyn Logger>)
}

fn market(
    providers: &[&Arc<MockProvider>],
    logger: &Arc<RecordingLogger>,
    ttl: Duration,
) -> MarketService {
    MarketService::new(
        Arc::new(registry(providers)),
        chain(logger),
        Arc::clone(logger) as Arc<dyn Logger>,
        ttl,
    )
}

fn news_service(
    registry: ProviderRegistry,
    logger: &Arc<RecordingLogger>,
    limit: usize,
) -> NewsService {
    NewsService::new(
        Arc::new(registry),
        chain(logger),
        Arc::clone(logger) as Arc<dyn Logger>,
        limit,
        Duration::from_secs(60),
    )
}

const QUOTES: &[DataKind] = &[DataKind::Quotes];
const NEWS: &[DataKind] = &[DataKind::News];

// ═══════════════════════════════════════════════════════════════════
// FallbackChain
// ═══════════════════════════════════════════════════════════════════

mod fallback_chain {
    use super::*;

    async fn resolve_quotes(
        chain: &FallbackChain,
        providers: &[Arc<dyn MarketDataProvider>],
    ) -> Result<Resolution<Normalized<Quote>>, CoreError> {
        let symbols = syms(&["NSE:TCS"]);
        let symbols_ref = &symbols;
        chain
            .resolve("quotes", Uuid::new_v4(), providers, |p| async move {
                p.get_quotes(None, symbols_ref).await
            })
            .await
    }

    #[tokio::test]
    async fn transient_retried_once_then_next_provider() {
        let logger = Arc::new(RecordingLogger::default());
        let a = Arc::new(
            MockProvider::new("a", QUOTES)
                .always(Failure::Transient)
                .quotes(vec![quote("NSE:TCS", 1.0)]),
        );
        let b = Arc::new(MockProvider::new("b", QUOTES).quotes(vec![quote("NSE:TCS", 2.0)]));
        let c = Arc::new(MockProvider::new("c", QUOTES).quotes(vec![quote("NSE:TCS", 3.0)]));

        let outcome = resolve_quotes(&chain(&logger), &dyns(&[&a, &b, &c]))
            .await
            .unwrap();

        match outcome {
            Resolution::Success {
                provider,
                value,
                failures,
            } => {
                assert_eq!(provider, "b");
                assert_eq!(value.items[0].last_price, 2.0);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].provider, "a");
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
        assert_eq!(logger.warnings().len(), 1);
    }

    #[tokio::test]
    async fn transient_recovered_by_retry() {
        let logger = Arc::new(RecordingLogger::default());
        let a = Arc::new(
            MockProvider::new("a", QUOTES)
                .failing_first(&[Failure::Transient])
                .quotes(vec![quote("NSE:TCS", 1.0)]),
        );

        let outcome = resolve_quotes(&chain(&logger), &dyns(&[&a])).await.unwrap();
        assert!(matches!(
            outcome,
            Resolution::Success { ref provider, ref failures, .. } if provider == "a" && failures.is_empty()
        ));
        assert_eq!(a.calls(), 2);
        assert!(logger.warnings().is_empty());
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let logger = Arc::new(RecordingLogger::default());
        let a = Arc::new(MockProvider::new("a", QUOTES).always(Failure::Quota));
        let b = Arc::new(MockProvider::new("b", QUOTES).always(Failure::Malformed));

        let outcome = resolve_quotes(&chain(&logger), &dyns(&[&a, &b])).await.unwrap();
        match outcome {
            Resolution::Exhausted { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].message.contains("Quota exceeded"));
                assert!(failures[1].message.contains("Malformed"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(logger.warnings().len(), 2);
    }

    #[tokio::test]
    async fn auth_error_moves_to_next_provider_without_retry() {
        let logger = Arc::new(RecordingLogger::default());
        let a = Arc::new(MockProvider::new("a", QUOTES).always(Failure::AuthExpired));
        let b = Arc::new(MockProvider::new("b", QUOTES).quotes(vec![quote("NSE:TCS", 2.0)]));

        let outcome = resolve_quotes(&chain(&logger), &dyns(&[&a, &b]))
            .await
            .unwrap();
        match outcome {
            Resolution::Success {
                provider, failures, ..
            } => {
                assert_eq!(provider, "b");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].provider, "a");
                assert!(failures[0].requires_login);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(logger.errors().len(), 1);
        assert!(logger.errors()[0].contains("provider=a"));
    }

    #[tokio::test]
    async fn exhausted_chain_reports_the_login_failure() {
        let logger = Arc::new(RecordingLogger::default());
        let a = Arc::new(MockProvider::new("a", QUOTES).always(Failure::Quota));
        let b = Arc::new(MockProvider::new("b", QUOTES).always(Failure::AuthExpired));
        let c = Arc::new(MockProvider::new("c", QUOTES).always(Failure::Malformed));

        let err = resolve_quotes(&chain(&logger), &dyns(&[&a, &b, &c]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AuthExpired { ref provider } if provider == "b"));
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 1);
    }

    #[tokio::test]
    async fn empty_result_counts_as_failure() {
        let logger = Arc::new(RecordingLogger::default());
        let a = Arc::new(MockProvider::new("a", QUOTES));
        let b = Arc::new(MockProvider::new("b", QUOTES).quotes(vec![quote("NSE:TCS", 2.0)]));

        let outcome = resolve_quotes(&chain(&logger), &dyns(&[&a, &b])).await.unwrap();
        match outcome {
            Resolution::Success {
                provider, failures, ..
            } => {
                assert_eq!(provider, "b");
                assert!(failures[0].message.contains("returned no data"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_providers_is_exhausted() {
        let logger = Arc::new(RecordingLogger::default());
        let outcome = resolve_quotes(&chain(&logger), &[]).await.unwrap();
        assert!(matches!(outcome, Resolution::Exhausted { ref failures } if failures.is_empty()));
    }
}

// ═══════════════════════════════════════════════════════════════════
// merge
// ═══════════════════════════════════════════════════════════════════

mod merging {
    use super::*;

    #[test]
    fn lower_rank_wins_regardless_of_batch_order() {
        let yahoo = RankedBatch::from_provider(1, "yahoo", vec![quote("NSE:TCS", 2.0)]);
        let kite = RankedBatch::from_provider(0, "kite", vec![quote("NSE:TCS", 1.0)]);

        for batches in [vec![yahoo.clone(), kite.clone()], vec![kite, yahoo]] {
            let merged = merge(batches, None);
            assert_eq!(merged.len(), 1);
            assert_eq!(merged[0].item.last_price, 1.0);
            assert_eq!(merged[0].source, Provenance::Provider("kite".into()));
        }
    }

    #[test]
    fn equal_ranks_keep_first_batch() {
        let first = RankedBatch::from_provider(0, "a", vec![quote("NSE:TCS", 1.0)]);
        let second = RankedBatch::from_provider(0, "b", vec![quote("NSE:TCS", 2.0)]);
        let merged = merge(vec![first, second], None);
        assert_eq!(merged[0].source.provider(), Some("a"));
    }

    #[test]
    fn output_is_canonically_sorted() {
        let batch = RankedBatch::from_provider(
            0,
            "kite",
            vec![quote("NSE:TCS", 1.0), quote("BSE:ITC", 1.0), quote("NSE:INFY", 1.0)],
        );
        let symbols: Vec<String> = merge(vec![batch], None)
            .into_iter()
            .map(|s| s.item.symbol)
            .collect();
        assert_eq!(symbols, ["BSE:ITC", "NSE:INFY", "NSE:TCS"]);
    }

    #[test]
    fn duplicate_news_unions_symbols() {
        let tcs = RankedBatch::from_provider(0, "newsapi", vec![{
            let mut a = article("deal", 1, &["NSE:TCS"]);
            a.sentiment = None;
            a
        }]);
        let infy = RankedBatch::from_provider(0, "newsapi", vec![{
            let mut a = article("deal", 1, &["NSE:INFY"]);
            a.sentiment = Some(Sentiment::Positive);
            a
        }]);
        let merged = merge(vec![tcs, infy], None);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].item.symbols, ["NSE:INFY", "NSE:TCS"]);
        assert_eq!(merged[0].item.sentiment, Some(Sentiment::Positive));
    }

    #[test]
    fn limit_keeps_newest() {
        let items = (0..5).map(|h| article(&format!("n{h}"), h, &["NSE:TCS"])).collect();
        let merged = merge(vec![RankedBatch::from_provider(0, "newsapi", items)], Some(3));
        let ids: Vec<&str> = merged.iter().map(|s| s.item.id.as_str()).collect();
        assert_eq!(ids, ["n0", "n1", "n2"]);
    }

    #[test]
    fn rank_of_places_placeholders_last() {
        let priority = syms(&["kite", "yahoo"]);
        assert_eq!(rank_of(&Provenance::Provider("yahoo".into()), &priority), 1);
        assert_eq!(rank_of(&Provenance::Provider("other".into()), &priority), 2);
        assert_eq!(rank_of(&Provenance::Placeholder, &priority), 2);
    }
}

// ═══════════════════════════════════════════════════════════════════
// CacheWindow
// ═══════════════════════════════════════════════════════════════════

mod cache_window {
    use super::*;

    #[test]
    fn fresh_within_ttl() {
        let cache = CacheWindow::new(Duration::from_secs(60));
        assert!(cache.is_empty());
        cache.put("NSE:TCS", 42);
        assert_eq!(cache.fresh("NSE:TCS"), Some(42));
        assert_eq!(cache.fresh("NSE:INFY"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_ttl_is_never_fresh_but_still_known() {
        let cache = CacheWindow::new(Duration::ZERO);
        cache.put("NSE:TCS", 42);
        assert_eq!(cache.fresh("NSE:TCS"), None);
        assert_eq!(cache.last_known("NSE:TCS"), Some(42));
    }

    #[test]
    fn put_overwrites_and_clear_empties() {
        let cache = CacheWindow::new(Duration::from_secs(60));
        cache.put("k", "old".to_string());
        cache.put("k", "new".to_string());
        assert_eq!(cache.fresh("k").as_deref(), Some("new"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.last_known("k"), None);
    }

    #[test]
    fn entries_past_retention_are_pruned() {
        let cache = CacheWindow::with_limits(Duration::ZERO, Duration::from_millis(20), 16);
        cache.put("NSE:TCS", 1);
        cache.put("NSE:INFY", 2);
        assert_eq!(cache.len(), 2);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.last_known("NSE:TCS"), None);

        cache.put("NSE:SBIN", 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.last_known("NSE:SBIN"), Some(3));

        std::thread::sleep(Duration::from_millis(40));
        cache.clear_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let cache = CacheWindow::with_limits(Duration::from_secs(60), Duration::from_secs(60), 2);
        cache.put("a", 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b", 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.put("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.last_known("a"), None);
        assert_eq!(cache.fresh("b"), Some(2));
        assert_eq!(cache.fresh("c"), Some(3));

        // Overwriting an existing key never evicts.
        cache.put("c", 4);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.fresh("b"), Some(2));
    }
}

// ═══════════════════════════════════════════════════════════════════
// MarketService — quotes
// ═══════════════════════════════════════════════════════════════════

mod market_quotes {
    use super::*;

    #[tokio::test]
    async fn sorted_and_not_degraded() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(
            MockProvider::new("kite", QUOTES)
                .quotes(vec![quote("NSE:TCS", 3900.0), quote("NSE:RELIANCE", 2950.0)]),
        );
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let result = service
            .get_quotes(None, &syms(&["NSE:TCS", "reliance"]))
            .await
            .unwrap();

        assert!(!result.degraded);
        assert!(!result.is_partial());
        let symbols: Vec<&str> = result.entities().map(|q| q.symbol.as_str()).collect();
        assert_eq!(symbols, ["NSE:RELIANCE", "NSE:TCS"]);
        assert!(result.items.iter().all(|s| s.source.provider() == Some("kite")));
    }

    #[tokio::test]
    async fn falls_back_and_reports_partial() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", QUOTES).always(Failure::Transient));
        let yahoo =
            Arc::new(MockProvider::new("yahoo", QUOTES).quotes(vec![quote("NSE:TCS", 3900.0)]));
        let service = market(&[&kite, &yahoo], &logger, Duration::from_secs(60));

        let result = service.get_quotes(None, &syms(&["NSE:TCS"])).await.unwrap();

        assert!(!result.degraded);
        assert!(result.is_partial());
        assert_eq!(result.failures[0].provider, "kite");
        assert_eq!(result.items[0].source.provider(), Some("yahoo"));
        assert_eq!(kite.calls(), 2);
    }

    #[tokio::test]
    async fn all_sources_down_returns_placeholders() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", QUOTES).always(Failure::Quota));
        let yahoo = Arc::new(MockProvider::new("yahoo", QUOTES).always(Failure::Malformed));
        let service = market(&[&kite, &yahoo], &logger, Duration::from_secs(60));

        let result = service
            .get_quotes(None, &syms(&["NSE:TCS", "NSE:INFY"]))
            .await
            .unwrap();

        assert!(result.degraded);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.len(), 2);
        assert!(result.items.iter().all(|s| s.source.is_placeholder()));
        assert_eq!(result.items[0].item.symbol, "NSE:INFY");
        assert_eq!(result.items[0].item.last_price, 0.0);
        assert!(logger
            .warnings()
            .iter()
            .any(|w| w.contains("all sources failed")));
    }

    #[tokio::test]
    async fn placeholders_reuse_last_known_values() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(
            MockProvider::new("kite", QUOTES)
                .quotes(vec![quote("NSE:TCS", 3900.0)])
                .failing_from(1, Failure::Malformed),
        );
        // Zero TTL: nothing is ever fresh, but values stay known.
        let service = market(&[&kite], &logger, Duration::ZERO);

        let first = service.get_quotes(None, &syms(&["NSE:TCS"])).await.unwrap();
        assert!(!first.degraded);

        let second = service.get_quotes(None, &syms(&["NSE:TCS"])).await.unwrap();
        assert!(second.degraded);
        assert_eq!(second.items[0].source, Provenance::Placeholder);
        assert_eq!(second.items[0].item.last_price, 3900.0);
    }

    #[tokio::test]
    async fn fresh_cache_only_fetches_missing_symbols() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(
            MockProvider::new("kite", QUOTES)
                .quotes(vec![quote("NSE:TCS", 3900.0), quote("NSE:INFY", 1600.0)]),
        );
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        service.get_quotes(None, &syms(&["NSE:TCS"])).await.unwrap();
        let cached = service.get_quotes(None, &syms(&["TCS"])).await.unwrap();
        assert_eq!(kite.calls(), 1);
        assert_eq!(cached.items[0].source.provider(), Some("kite"));

        let both = service
            .get_quotes(None, &syms(&["NSE:TCS", "NSE:INFY"]))
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(kite.requested(), vec![syms(&["NSE:TCS"]), syms(&["NSE:INFY"])]);
    }

    #[tokio::test]
    async fn expired_broker_session_falls_back_to_public_source() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", QUOTES).always(Failure::AuthExpired));
        let yahoo =
            Arc::new(MockProvider::new("yahoo", QUOTES).quotes(vec![quote("NSE:TCS", 1.0)]));
        let service = market(&[&kite, &yahoo], &logger, Duration::from_secs(60));

        let result = service.get_quotes(None, &syms(&["NSE:TCS"])).await.unwrap();

        assert!(!result.degraded);
        assert_eq!(result.items[0].source.provider(), Some("yahoo"));
        assert!(result.failures.iter().any(|f| f.provider == "kite" && f.requires_login));
        assert_eq!(kite.calls(), 1);
        assert_eq!(yahoo.calls(), 1);
    }

    #[tokio::test]
    async fn login_failure_is_returned_when_nothing_serves() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", QUOTES).always(Failure::AuthExpired));
        let yahoo = Arc::new(MockProvider::new("yahoo", QUOTES).always(Failure::Transient));
        let service = market(&[&kite, &yahoo], &logger, Duration::from_secs(60));

        let err = service
            .get_quotes(None, &syms(&["NSE:TCS"]))
            .await
            .unwrap_err();
        assert!(err.requires_login());
        assert_eq!(yahoo.calls(), 2);
    }

    #[tokio::test]
    async fn symbols_omitted_by_the_winner_go_to_later_sources() {
        let logger = Arc::new(RecordingLogger::default());
        let kite =
            Arc::new(MockProvider::new("kite", QUOTES).quotes(vec![quote("NSE:TCS", 3900.0)]));
        let yahoo = Arc::new(
            MockProvider::new("yahoo", QUOTES)
                .quotes(vec![quote("NSE:TCS", 1.0), quote("NSE:INFY", 1600.0)]),
        );
        let service = market(&[&kite, &yahoo], &logger, Duration::from_secs(60));

        let result = service
            .get_quotes(None, &syms(&["NSE:TCS", "NSE:INFY"]))
            .await
            .unwrap();

        assert!(!result.degraded);
        assert_eq!(result.len(), 2);
        assert_eq!(result.items[0].item.symbol, "NSE:INFY");
        assert_eq!(result.items[0].source.provider(), Some("yahoo"));
        assert_eq!(result.items[1].item.symbol, "NSE:TCS");
        assert_eq!(result.items[1].source.provider(), Some("kite"));
        assert_eq!(result.items[1].item.last_price, 3900.0);
        assert_eq!(yahoo.requested(), vec![syms(&["NSE:INFY"])]);
        assert!(result.is_partial());
        assert!(result.failures[0].message.contains("NSE:INFY"));
    }

    #[tokio::test]
    async fn symbols_no_source_has_become_placeholders() {
        let logger = Arc::new(RecordingLogger::default());
        let kite =
            Arc::new(MockProvider::new("kite", QUOTES).quotes(vec![quote("NSE:TCS", 3900.0)]));
        let yahoo =
            Arc::new(MockProvider::new("yahoo", QUOTES).quotes(vec![quote("NSE:TCS", 1.0)]));
        let service = market(&[&kite, &yahoo], &logger, Duration::from_secs(60));

        let result = service
            .get_quotes(None, &syms(&["NSE:TCS", "NSE:INFY"]))
            .await
            .unwrap();

        assert!(!result.degraded);
        assert_eq!(result.len(), 2);
        assert_eq!(result.items[0].item.symbol, "NSE:INFY");
        assert!(result.items[0].source.is_placeholder());
        assert_eq!(result.items[1].source.provider(), Some("kite"));
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures.iter().all(|f| !f.requires_login));
        assert!(logger
            .warnings()
            .iter()
            .any(|w| w.contains("no source had NSE:INFY")));
    }

    #[tokio::test]
    async fn rejected_records_are_counted_and_logged() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(
            MockProvider::new("kite", QUOTES)
                .quotes(vec![quote("NSE:TCS", 1.0)])
                .rejecting(1),
        );
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let result = service.get_quotes(None, &syms(&["NSE:TCS"])).await.unwrap();
        assert_eq!(result.rejected, 1);
        assert_eq!(result.len(), 1);
        assert_eq!(logger.errors().len(), 1);
        assert!(logger.errors()[0].contains("request_id="));
    }

    #[tokio::test]
    async fn symbols_are_canonicalized_and_deduped() {
        let logger = Arc::new(RecordingLogger::default());
        let kite =
            Arc::new(MockProvider::new("kite", QUOTES).quotes(vec![quote("NSE:TCS", 1.0)]));
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let result = service
            .get_quotes(None, &syms(&["tcs", "NSE:TCS", " nse:tcs "]))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(kite.requested(), vec![syms(&["NSE:TCS"])]);
    }

    #[tokio::test]
    async fn empty_request_is_empty_success() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", QUOTES));
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let result = service.get_quotes(None, &[]).await.unwrap();
        assert!(result.is_empty());
        assert!(!result.degraded);
        assert_eq!(kite.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_symbol_is_validation_error() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", QUOTES));
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let err = service
            .get_quotes(None, &syms(&["NSE:"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn no_quote_provider() {
        let logger = Arc::new(RecordingLogger::default());
        let news = Arc::new(MockProvider::new("newsapi", NEWS));
        let service = market(&[&news], &logger, Duration::from_secs(60));

        let err = service
            .get_quotes(None, &syms(&["NSE:TCS"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoProvider(ref kind) if kind == "quotes"));
    }

    #[tokio::test]
    async fn every_request_gets_its_own_id() {
        let logger = Arc::new(RecordingLogger::default());
        let kite =
            Arc::new(MockProvider::new("kite", QUOTES).quotes(vec![quote("NSE:TCS", 1.0)]));
        let service = market(&[&kite], &logger, Duration::ZERO);

        let a = service.get_quotes(None, &syms(&["NSE:TCS"])).await.unwrap();
        let b = service.get_quotes(None, &syms(&["NSE:TCS"])).await.unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn canonical_symbols_keeps_first_seen_order() {
        let out = canonical_symbols(&syms(&["tcs", "BSE:ITC", "NSE:TCS"])).unwrap();
        assert_eq!(out, ["NSE:TCS", "BSE:ITC"]);
        assert!(canonical_symbols(&syms(&[""])).is_err());
    }
}

// ═══════════════════════════════════════════════════════════════════
// MarketService — holdings and candles
// ═══════════════════════════════════════════════════════════════════

mod market_holdings_and_candles {
    use super::*;

    const HOLDINGS: &[DataKind] = &[DataKind::Holdings];
    const CANDLES: &[DataKind] = &[DataKind::Candles];

    #[tokio::test]
    async fn holdings_sorted_by_key() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", HOLDINGS).holdings(vec![
            holding("TCS", 5, 3500.0, 3900.0, 1.0),
            holding("INFY", 10, 1400.0, 1600.0, -0.5),
        ]));
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let result = service.get_holdings(None).await.unwrap();
        let keys: Vec<String> = result.entities().map(Holding::key).collect();
        assert_eq!(keys, ["NSE:INFY", "NSE:TCS"]);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn holdings_always_go_upstream() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(
            MockProvider::new("kite", HOLDINGS).holdings(vec![holding("TCS", 5, 1.0, 1.0, 0.0)]),
        );
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        service.get_holdings(None).await.unwrap();
        service.get_holdings(None).await.unwrap();
        assert_eq!(kite.calls(), 2);
    }

    #[tokio::test]
    async fn holdings_degrade_to_last_known() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(
            MockProvider::new("kite", HOLDINGS)
                .holdings(vec![holding("TCS", 5, 3500.0, 3900.0, 1.0)])
                .failing_from(1, Failure::Transient),
        );
        let service = market(&[&kite], &logger, Duration::from_secs(60));
        let cred = Credential::kite("key", "token", None);

        service.get_holdings(Some(&cred)).await.unwrap();
        let degraded = service.get_holdings(Some(&cred)).await.unwrap();

        assert!(degraded.degraded);
        assert_eq!(degraded.len(), 1);
        assert!(degraded.items[0].source.is_placeholder());
        assert_eq!(degraded.items[0].item.quantity, 5);
        assert_eq!(kite.calls(), 3);
    }

    #[tokio::test]
    async fn holdings_auth_error_has_no_placeholders() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", HOLDINGS).always(Failure::AuthExpired));
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let err = service.get_holdings(None).await.unwrap_err();
        assert!(matches!(err, CoreError::AuthExpired { .. }));
    }

    #[tokio::test]
    async fn candles_filtered_to_range_and_sorted() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", CANDLES).candles(vec![
            candle(13, 103.0),
            candle(11, 101.0),
            candle(20, 999.0),
            candle(12, 102.0),
        ]));
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let from = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let result = service
            .get_candles(None, "INFY", CandleInterval::Day, from, to)
            .await
            .unwrap();

        let closes: Vec<f64> = result.entities().map(|c| c.close).collect();
        assert_eq!(closes, [101.0, 102.0, 103.0]);
    }

    #[tokio::test]
    async fn empty_candle_range_is_rejected() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(MockProvider::new("kite", CANDLES));
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let at = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        let err = service
            .get_candles(None, "INFY", CandleInterval::Day, at, at)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(kite.calls(), 0);
    }

    #[tokio::test]
    async fn candles_degrade_to_last_known_for_a_moved_range() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(
            MockProvider::new("kite", CANDLES)
                .candles(vec![candle(11, 101.0), candle(12, 102.0), candle(13, 103.0)])
                .failing_from(1, Failure::Transient),
        );
        let service = market(&[&kite], &logger, Duration::ZERO);

        let from = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap();
        service
            .get_candles(None, "INFY", CandleInterval::Day, from, to)
            .await
            .unwrap();

        // Same series, window shifted by a day: the stored candles still serve.
        let later_from = Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap();
        let later_to = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let degraded = service
            .get_candles(None, "INFY", CandleInterval::Day, later_from, later_to)
            .await
            .unwrap();

        assert!(degraded.degraded);
        let closes: Vec<f64> = degraded.entities().map(|c| c.close).collect();
        assert_eq!(closes, [102.0, 103.0]);
        assert!(degraded.items.iter().all(|s| s.source.is_placeholder()));
        assert_eq!(kite.calls(), 3);
    }

    #[tokio::test]
    async fn fresh_candles_covering_the_range_skip_upstream() {
        let logger = Arc::new(RecordingLogger::default());
        let kite = Arc::new(
            MockProvider::new("kite", CANDLES)
                .candles(vec![candle(11, 101.0), candle(12, 102.0), candle(13, 103.0)]),
        );
        let service = market(&[&kite], &logger, Duration::from_secs(60));

        let from = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap();
        service
            .get_candles(None, "INFY", CandleInterval::Day, from, to)
            .await
            .unwrap();

        let inner_from = Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap();
        let cached = service
            .get_candles(None, "INFY", CandleInterval::Day, inner_from, to)
            .await
            .unwrap();
        assert_eq!(kite.calls(), 1);
        assert!(!cached.degraded);
        let closes: Vec<f64> = cached.entities().map(|c| c.close).collect();
        assert_eq!(closes, [102.0, 103.0]);
        assert_eq!(cached.items[0].source.provider(), Some("kite"));

        // A longer range is not covered and goes upstream again.
        let wider_to = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        service
            .get_candles(None, "INFY", CandleInterval::Day, from, wider_to)
            .await
            .unwrap();
        assert_eq!(kite.calls(), 2);
    }
}

// ═══════════════════════════════════════════════════════════════════
// NewsService
// ═══════════════════════════════════════════════════════════════════

mod news {
    use super::*;

    fn registry_with(providers: &[&Arc<MockProvider>]) -> ProviderRegistry {
        let mut r = registry(providers);
        r.register(Arc::new(KeywordSentimentProvider));
        r
    }

    #[tokio::test]
    async fn merges_symbols_newest_first() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(MockProvider::new("newsapi", NEWS).news(vec![
            article("tcs-old", 10, &["NSE:TCS"]),
            article("shared", 2, &["NSE:TCS", "NSE:INFY"]),
            article("infy-new", 1, &["NSE:INFY"]),
        ]));
        let service = news_service(registry_with(&[&newsapi]), &logger, 50);

        let result = service
            .get_news(&syms(&["TCS", "INFY"]), 24)
            .await
            .unwrap();

        let ids: Vec<&str> = result.entities().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["infy-new", "shared", "tcs-old"]);
        let shared = result.entities().find(|n| n.id == "shared").unwrap();
        assert_eq!(shared.symbols, ["NSE:INFY", "NSE:TCS"]);
        assert!(!result.degraded);
        assert_eq!(newsapi.calls(), 2);
    }

    #[tokio::test]
    async fn items_outside_window_are_dropped() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(MockProvider::new("newsapi", NEWS).news(vec![
            article("fresh", 3, &["NSE:TCS"]),
            article("stale", 48, &["NSE:TCS"]),
        ]));
        let service = news_service(registry_with(&[&newsapi]), &logger, 50);

        let result = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        let ids: Vec<&str> = result.entities().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["fresh"]);
    }

    #[tokio::test]
    async fn limit_applies_after_merge() {
        let logger = Arc::new(RecordingLogger::default());
        let items = (1..=6)
            .map(|h| article(&format!("n{h}"), h, &["NSE:TCS"]))
            .collect();
        let newsapi = Arc::new(MockProvider::new("newsapi", NEWS).news(items));
        let service = news_service(registry_with(&[&newsapi]), &logger, 2);

        let result = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        let ids: Vec<&str> = result.entities().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["n1", "n2"]);
    }

    #[tokio::test]
    async fn falls_back_per_symbol() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(MockProvider::new("newsapi", NEWS).always(Failure::Quota));
        let av = Arc::new(
            MockProvider::new("alphavantage", NEWS).news(vec![article("av", 1, &["NSE:TCS"])]),
        );
        let service = news_service(registry_with(&[&newsapi, &av]), &logger, 50);

        let result = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.items[0].source.provider(), Some("alphavantage"));
        assert!(result.is_partial());
    }

    #[tokio::test]
    async fn missing_sentiment_is_labelled() {
        let logger = Arc::new(RecordingLogger::default());
        let mut labelled = article("labelled", 2, &["NSE:TCS"]);
        labelled.sentiment = Some(Sentiment::Negative);
        let newsapi = Arc::new(
            MockProvider::new("newsapi", NEWS).news(vec![article("surge", 1, &["NSE:TCS"]), labelled]),
        );
        let service = news_service(registry_with(&[&newsapi]), &logger, 50);

        let result = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        let by_id = |id: &str| result.entities().find(|n| n.id == id).unwrap().sentiment;
        assert_eq!(by_id("surge"), Some(Sentiment::Positive));
        assert_eq!(by_id("labelled"), Some(Sentiment::Negative));
    }

    #[tokio::test]
    async fn sentiment_chain_order_is_respected() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(
            MockProvider::new("newsapi", NEWS).news(vec![article("a", 1, &["NSE:TCS"])]),
        );
        let openai = Arc::new(
            MockProvider::new("openai", &[DataKind::Sentiment]).label(Sentiment::Neutral),
        );
        let mut registry = registry_with(&[&newsapi]);
        registry.register(Arc::clone(&openai) as Arc<dyn MarketDataProvider>);
        registry.set_order(DataKind::Sentiment, syms(&["openai", "keywords"]));
        let service = news_service(registry, &logger, 50);

        let result = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        assert_eq!(result.items[0].item.sentiment, Some(Sentiment::Neutral));
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test]
    async fn sentiment_failure_never_fails_news() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(
            MockProvider::new("newsapi", NEWS).news(vec![article("a", 1, &["NSE:TCS"])]),
        );
        let openai = Arc::new(
            MockProvider::new("openai", &[DataKind::Sentiment]).always(Failure::AuthExpired),
        );
        let mut registry = registry(&[&newsapi]);
        registry.register(Arc::clone(&openai) as Arc<dyn MarketDataProvider>);
        let service = news_service(registry, &logger, 50);

        let result = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.items[0].item.sentiment, None);
        assert!(!result.degraded);
        assert!(logger
            .warnings()
            .iter()
            .any(|w| w.contains("sentiment labelling skipped")));
    }

    #[tokio::test]
    async fn rejected_openai_key_falls_back_to_keywords() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(
            MockProvider::new("newsapi", NEWS).news(vec![article("a", 1, &["NSE:TCS"])]),
        );
        let openai = Arc::new(
            MockProvider::new("openai", &[DataKind::Sentiment]).always(Failure::AuthExpired),
        );
        let mut registry = registry(&[&newsapi]);
        registry.register(Arc::clone(&openai) as Arc<dyn MarketDataProvider>);
        registry.register(Arc::new(KeywordSentimentProvider));
        assert_eq!(
            registry
                .providers_for(DataKind::Sentiment)
                .iter()
                .map(|p| p.id().to_string())
                .collect::<Vec<_>>(),
            ["openai", "keywords"]
        );
        let service = news_service(registry, &logger, 50);

        let result = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        assert_eq!(result.items[0].item.title, "Shares surge on a");
        assert_eq!(result.items[0].item.sentiment, Some(Sentiment::Positive));
        assert_eq!(openai.calls(), 1);
        assert!(!logger
            .warnings()
            .iter()
            .any(|w| w.contains("sentiment labelling skipped")));
    }

    #[tokio::test]
    async fn rejected_news_key_falls_back_to_next_source() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(MockProvider::new("newsapi", NEWS).always(Failure::AuthExpired));
        let alphavantage = Arc::new(
            MockProvider::new("alphavantage", NEWS).news(vec![article("a", 1, &["NSE:TCS"])]),
        );
        let service = news_service(registry_with(&[&newsapi, &alphavantage]), &logger, 50);

        let result = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.items[0].source.provider(), Some("alphavantage"));
        assert!(result.is_partial());
        assert_eq!(newsapi.calls(), 1);
        assert_eq!(alphavantage.calls(), 1);
    }

    #[tokio::test]
    async fn degraded_only_when_every_symbol_fails() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(MockProvider::new("newsapi", NEWS).always(Failure::Transient));
        let service = news_service(registry_with(&[&newsapi]), &logger, 50);

        let result = service
            .get_news(&syms(&["TCS", "INFY"]), 24)
            .await
            .unwrap();
        assert!(result.degraded);
        assert!(result.is_empty());
        assert_eq!(result.failures.len(), 2);
        // One call plus one retry per symbol.
        assert_eq!(newsapi.calls(), 4);
    }

    #[tokio::test]
    async fn one_symbol_failing_is_partial() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(
            MockProvider::new("newsapi", NEWS).news(vec![article("tcs", 1, &["NSE:TCS"])]),
        );
        let service = news_service(registry_with(&[&newsapi]), &logger, 50);

        // INFY has no items: an empty result is a failure for that symbol.
        let result = service
            .get_news(&syms(&["TCS", "INFY"]), 24)
            .await
            .unwrap();
        assert!(!result.degraded);
        assert!(result.is_partial());
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn window_bounds_are_validated() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(MockProvider::new("newsapi", NEWS));
        let service = news_service(registry_with(&[&newsapi]), &logger, 50);

        for hours in [0, 721] {
            let err = service.get_news(&syms(&["TCS"]), hours).await.unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)), "hours {hours}");
        }
        assert_eq!(newsapi.calls(), 0);
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache() {
        let logger = Arc::new(RecordingLogger::default());
        let newsapi = Arc::new(
            MockProvider::new("newsapi", NEWS).news(vec![article("a", 1, &["NSE:TCS"])]),
        );
        let service = news_service(registry_with(&[&newsapi]), &logger, 50);

        service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        let again = service.get_news(&syms(&["TCS"]), 24).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(newsapi.calls(), 1);

        service.get_news(&syms(&["TCS"]), 48).await.unwrap();
        assert_eq!(newsapi.calls(), 2);
    }
}

// ═══════════════════════════════════════════════════════════════════
// IndicatorService
// ═══════════════════════════════════════════════════════════════════

mod indicators {
    use super::*;

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn rsi_balanced_moves_is_fifty() {
        assert_eq!(rsi(&[10.0, 11.0, 10.0], 2), Some(50.0));
    }

    #[test]
    fn rsi_only_gains_is_hundred() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_flat_is_fifty() {
        assert_eq!(rsi(&[5.0; 20], 14), Some(50.0));
    }

    #[test]
    fn rsi_needs_period_plus_one() {
        assert_eq!(rsi(&[1.0, 2.0], 2), None);
        assert_eq!(rsi(&[1.0, 2.0, 3.0], 0), None);
    }

    #[test]
    fn ema_seeded_with_sma() {
        let out = ema(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out, vec![2.0, 3.0, 4.0]);
        assert!(ema(&[1.0, 2.0], 3).is_empty());
    }

    #[test]
    fn macd_on_linear_trend() {
        // Linear input: both EMAs sit at a constant lag, so the line is
        // slow_lag - fast_lag = 12.5 - 5.5 = 7 and the histogram is zero.
        let closes: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let Macd {
            macd: line,
            signal,
            histogram,
        } = macd(&closes, 12, 26, 9).unwrap();
        assert!(close_enough(line, 7.0));
        assert!(close_enough(signal, 7.0));
        assert!(histogram.abs() < 1e-9);
    }

    #[test]
    fn macd_needs_enough_history() {
        let closes: Vec<f64> = (0..33).map(|i| i as f64).collect();
        assert!(macd(&closes, 12, 26, 9).is_none());
        let closes: Vec<f64> = (0..34).map(|i| i as f64).collect();
        assert!(macd(&closes, 12, 26, 9).is_some());
    }

    #[test]
    fn bollinger_population_sigma() {
        let bands = bollinger(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8, 2.0).unwrap();
        assert_eq!(
            bands,
            BollingerBands {
                upper: 9.0,
                middle: 5.0,
                lower: 1.0
            }
        );
        assert!(bollinger(&[1.0], 2, 2.0).is_none());
    }

    #[test]
    fn vote_needs_two_net_votes() {
        let rising = Some(Macd {
            macd: 1.0,
            signal: 0.5,
            histogram: 0.5,
        });
        let falling = Some(Macd {
            macd: -1.0,
            signal: -0.5,
            histogram: -0.5,
        });
        let bands = Some(BollingerBands {
            upper: 110.0,
            middle: 100.0,
            lower: 90.0,
        });

        assert_eq!(vote(85.0, Some(25.0), rising, bands), Signal::Buy);
        assert_eq!(vote(100.0, Some(25.0), rising, bands), Signal::Buy);
        assert_eq!(vote(115.0, Some(75.0), falling, bands), Signal::Sell);
        assert_eq!(vote(100.0, Some(25.0), falling, bands), Signal::Hold);
        assert_eq!(vote(100.0, None, None, None), Signal::Hold);
    }

    #[test]
    fn snapshot_sorts_candles_and_reports_missing_indicators() {
        let candles: Vec<Candle> = (1..=10).rev().map(|d| candle(d, 100.0 + d as f64)).collect();
        let snap = IndicatorService::new()
            .snapshot("NSE:INFY", &candles, "kite")
            .unwrap();

        assert_eq!(snap.last_close, 110.0);
        assert_eq!(snap.candles_used, 10);
        assert!(snap.rsi.is_none());
        assert!(snap.macd.is_none());
        assert!(snap.bollinger.is_none());
        assert_eq!(snap.signal, Signal::Hold);
        assert_eq!(snap.source, "kite");
    }

    #[test]
    fn snapshot_with_full_history() {
        let candles: Vec<Candle> = (1..=31)
            .chain(1..=9)
            .enumerate()
            .map(|(i, d)| Candle {
                timestamp: Utc.with_ymd_and_hms(2024, 1 + (i / 31) as u32, d, 0, 0, 0).unwrap(),
                ..candle(1, 100.0 + i as f64)
            })
            .collect();
        let snap = IndicatorService::new()
            .snapshot("NSE:INFY", &candles, "yahoo")
            .unwrap();

        assert_eq!(snap.candles_used, 40);
        assert_eq!(snap.rsi, Some(100.0));
        assert!(snap.macd.is_some());
        assert!(snap.bollinger.is_some());
    }

    #[test]
    fn snapshot_without_candles_fails() {
        let err = IndicatorService::new()
            .snapshot("NSE:INFY", &[], "kite")
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn signal_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Signal::Buy).unwrap(), "\"BUY\"");
        assert_eq!(serde_json::to_string(&Signal::Hold).unwrap(), "\"HOLD\"");
    }
}

// ═══════════════════════════════════════════════════════════════════
// AnalyticsService
// ═══════════════════════════════════════════════════════════════════

mod analytics {
    use super::*;

    fn result(holdings: Vec<Holding>) -> AggregatedResult<Holding> {
        AggregatedResult::success(
            holdings
                .into_iter()
                .map(|h| Sourced::from_provider(h, "kite"))
                .collect(),
        )
    }

    #[test]
    fn totals_allocation_and_concentration() {
        let holdings = result(vec![
            holding("TCS", 10, 100.0, 150.0, 2.0),
            holding("HDFCBANK", 20, 50.0, 25.0, -1.0),
            holding("SOLD", 0, 10.0, 10.0, 0.0),
        ]);
        let summary =
            AnalyticsService::new().portfolio_summary(&holdings, &[], &Settings::default());

        assert_eq!(summary.holdings_count, 2);
        assert_eq!(summary.total_value, 2000.0);
        assert_eq!(summary.total_investment, 2000.0);
        assert_eq!(summary.total_pnl, 0.0);
        assert_eq!(summary.pnl_percentage, 0.0);
        assert!((summary.day_change_percentage - 1.25).abs() < 1e-9);
        assert!((summary.concentration_index - 6250.0).abs() < 1e-6);
        assert!((summary.sector_allocation["IT"] - 75.0).abs() < 1e-9);
        assert!((summary.sector_allocation["Banking"] - 25.0).abs() < 1e-9);
        assert!(!summary.degraded);
    }

    #[test]
    fn performers_by_return() {
        let holdings = result(vec![
            holding("A", 1, 100.0, 110.0, 0.0),
            holding("B", 1, 100.0, 90.0, 0.0),
            holding("C", 1, 100.0, 150.0, 0.0),
            holding("D", 1, 100.0, 100.0, 0.0),
        ]);
        let summary =
            AnalyticsService::new().portfolio_summary(&holdings, &[], &Settings::default());

        let top: Vec<&str> = summary.top_performers.iter().map(|p| p.symbol.as_str()).collect();
        let worst: Vec<&str> = summary.worst_performers.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(top, ["NSE:C", "NSE:A", "NSE:D"]);
        assert_eq!(worst, ["NSE:B", "NSE:D", "NSE:A"]);
        assert!((summary.top_performers[0].return_pct - 50.0).abs() < 1e-9);
        assert!((summary.sector_allocation["Other"] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_portfolio_is_all_zero() {
        let summary =
            AnalyticsService::new().portfolio_summary(&result(vec![]), &[], &Settings::default());
        assert_eq!(summary.total_value, 0.0);
        assert_eq!(summary.pnl_percentage, 0.0);
        assert_eq!(summary.day_change_percentage, 0.0);
        assert_eq!(summary.concentration_index, 0.0);
        assert!(summary.top_performers.is_empty());
        assert!(summary.sector_allocation.is_empty());
    }

    #[test]
    fn degraded_input_marks_summary() {
        let degraded = AggregatedResult::degraded(
            vec![Sourced::placeholder(holding("TCS", 1, 1.0, 1.0, 0.0))],
            vec![],
        );
        let summary =
            AnalyticsService::new().portfolio_summary(&degraded, &[], &Settings::default());
        assert!(summary.degraded);
    }

    /// Ten holdings, one per sector, equal value.
    fn spread_portfolio() -> AggregatedResult<Holding> {
        result(
            [
                "TCS", "HDFCBANK", "BAJFINANCE", "SBILIFE", "SUNPHARMA", "MARUTI", "ONGC", "NTPC",
                "ITC", "LT",
            ]
            .iter()
            .map(|s| holding(s, 1, 100.0, 100.0, 0.0))
            .collect(),
        )
    }

    fn kinds(summary: &PortfolioSummary) -> Vec<AlertKind> {
        summary.alerts.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn diversified_portfolio_has_no_alerts() {
        let summary = AnalyticsService::new().portfolio_summary(
            &spread_portfolio(),
            &[],
            &Settings::default(),
        );
        assert_eq!(summary.sector_allocation.len(), 10);
        assert!((summary.concentration_index - 1000.0).abs() < 1e-6);
        assert!(summary.alerts.is_empty());
    }

    #[test]
    fn sector_above_limit_is_flagged() {
        let settings = Settings {
            max_sector_pct: 8.0,
            ..Settings::default()
        };
        let summary =
            AnalyticsService::new().portfolio_summary(&spread_portfolio(), &[], &settings);

        assert_eq!(summary.alerts.len(), 10);
        assert!(summary
            .alerts
            .iter()
            .all(|a| a.kind == AlertKind::SectorConcentration
                && a.severity == AlertSeverity::Warning));
        assert!(summary.alerts[0].message.contains("(10.00%)"));
    }

    #[test]
    fn too_few_sectors_is_flagged() {
        let holdings = result(vec![
            holding("TCS", 1, 100.0, 100.0, 0.0),
            holding("INFY", 1, 100.0, 100.0, 0.0),
            holding("WIPRO", 1, 100.0, 100.0, 0.0),
            holding("HCLTECH", 1, 100.0, 100.0, 0.0),
            holding("HDFCBANK", 1, 100.0, 100.0, 0.0),
            holding("ICICIBANK", 1, 100.0, 100.0, 0.0),
            holding("SBIN", 1, 100.0, 100.0, 0.0),
            holding("AXISBANK", 1, 100.0, 100.0, 0.0),
        ]);
        let settings = Settings {
            max_sector_pct: 60.0,
            ..Settings::default()
        };
        let summary = AnalyticsService::new().portfolio_summary(&holdings, &[], &settings);

        // Eight equal holdings: HHI 1250, two sectors at 50% each.
        assert_eq!(kinds(&summary), [AlertKind::SectorDiversification]);
        assert!(summary.alerts[0].message.contains("only 2 sectors"));
    }

    #[test]
    fn concentrated_holdings_are_flagged() {
        let holdings = result(vec![
            holding("TCS", 10, 100.0, 150.0, 2.0),
            holding("HDFCBANK", 20, 50.0, 25.0, -1.0),
        ]);
        let summary =
            AnalyticsService::new().portfolio_summary(&holdings, &[], &Settings::default());

        assert_eq!(
            kinds(&summary),
            [
                AlertKind::SectorConcentration,
                AlertKind::SectorDiversification,
                AlertKind::HighConcentration,
            ]
        );
        assert!(summary.alerts[0].message.contains("IT sector (75.00%)"));
        assert!(summary.alerts[2].message.contains("HHI: 6250.00"));

        let relaxed = Settings {
            max_concentration_index: 7000.0,
            ..Settings::default()
        };
        let summary = AnalyticsService::new().portfolio_summary(&holdings, &[], &relaxed);
        assert!(!kinds(&summary).contains(&AlertKind::HighConcentration));
    }

    #[test]
    fn negative_news_about_held_symbols_is_flagged() {
        let mut bad = article("tcs-slump", 1, &["NSE:TCS", "NSE:WIPRO"]);
        bad.title = "TCS shares slump after weak guidance".into();
        bad.sentiment = Some(Sentiment::Negative);
        let mut unrelated = article("wipro-slump", 1, &["NSE:WIPRO"]);
        unrelated.sentiment = Some(Sentiment::Negative);
        let mut good = article("tcs-rally", 1, &["NSE:TCS"]);
        good.sentiment = Some(Sentiment::Positive);
        let unlabelled = article("tcs-plain", 1, &["NSE:TCS"]);

        let summary = AnalyticsService::new().portfolio_summary(
            &spread_portfolio(),
            &[bad, unrelated, good, unlabelled],
            &Settings::default(),
        );

        assert_eq!(summary.alerts.len(), 1);
        let alert = &summary.alerts[0];
        assert_eq!(alert.kind, AlertKind::NegativeNews);
        assert_eq!(alert.severity, AlertSeverity::Info);
        assert_eq!(alert.symbols, ["NSE:TCS"]);
        assert_eq!(
            alert.message,
            "Negative news for NSE:TCS: TCS shares slump after weak guidance"
        );
        assert_eq!(alert.url.as_deref(), Some("https://example.com/tcs-slump"));
    }

    #[test]
    fn empty_portfolio_raises_nothing() {
        let mut bad = article("tcs-slump", 1, &["NSE:TCS"]);
        bad.sentiment = Some(Sentiment::Negative);
        let summary = AnalyticsService::new().portfolio_summary(
            &result(vec![]),
            &[bad],
            &Settings::default(),
        );
        assert!(summary.alerts.is_empty());
    }
}
