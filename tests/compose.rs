use async_trait::async_trait;
use portfolio_composer::ai::{AiError, NarrativeAnalyzer, NarrativeRequest};
use portfolio_composer::allocation::{AllocationTarget, PriceLookup};
use portfolio_composer::config::{AllocationConfig, DiscoveryConfig, FailurePolicy, MarketDataConfig};
use portfolio_composer::discovery::StaticDiscovery;
use portfolio_composer::quotes::{
    Fundamentals, HistoryPeriod, LatestQuote, MarketDataClient, MarketDataProvider, PriceQuote,
    PriceSource, Quote,
};
use portfolio_composer::{ComposeRequest, ComposerError, ErrorKind, PortfolioComposer};
use std::collections::HashMap;
use std::sync::Arc;

struct TablePrices(HashMap<&'static str, f64>);

impl TablePrices {
    fn standard() -> Self {
        Self(HashMap::from([
            ("JNJ", 150.0),
            ("PG", 160.0),
            ("JPM", 200.0),
            ("NVDA", 120.0),
            ("AMZN", 180.0),
            ("GOOGL", 170.0),
            ("AGG", 100.0),
        ]))
    }
}

#[async_trait]
impl PriceLookup for TablePrices {
    async fn price(&self, ticker: &str) -> Result<PriceQuote, ComposerError> {
        self.0
            .get(ticker)
            .map(|p| PriceQuote::live(ticker, *p))
            .ok_or_else(|| ComposerError::data_unavailable(ticker, "not in table"))
    }
}

/// Echoes the line count and language
struct EchoNarrator;

#[async_trait]
impl NarrativeAnalyzer for EchoNarrator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn analyze(&self, request: NarrativeRequest<'_>) -> Result<String, AiError> {
        Ok(format!("{} positions ({})", request.lines.len(), request.language))
    }
}

/// Provider that is always down
struct OfflineProvider;

#[async_trait]
impl MarketDataProvider for OfflineProvider {
    fn name(&self) -> &'static str {
        "Offline"
    }

    async fn latest_quote(&self, symbol: &str) -> Result<LatestQuote, ComposerError> {
        Err(ComposerError::data_unavailable(symbol, "connection refused"))
    }

    async fn latest_daily_close(&self, symbol: &str) -> Result<LatestQuote, ComposerError> {
        Err(ComposerError::data_unavailable(symbol, "connection refused"))
    }

    async fn fundamentals(&self, symbol: &str) -> Result<Fundamentals, ComposerError> {
        Err(ComposerError::data_unavailable(symbol, "connection refused"))
    }

    async fn history(&self, symbol: &str, _period: HistoryPeriod) -> Result<Vec<Quote>, ComposerError> {
        Err(ComposerError::data_unavailable(symbol, "connection refused"))
    }
}

fn static_composer(prices: Arc<dyn PriceLookup>) -> PortfolioComposer {
    PortfolioComposer::new(
        Arc::new(StaticDiscovery::new(DiscoveryConfig::default())),
        prices,
        AllocationConfig::default(),
    )
}

fn offline_client(policy: FailurePolicy) -> MarketDataClient {
    let settings = MarketDataConfig {
        min_request_interval_secs: 0,
        failure_policy: policy,
        fallback_prices: [("AGG".to_string(), 95.0)].into_iter().collect(),
        ..MarketDataConfig::default()
    };
    MarketDataClient::new(Arc::new(OfflineProvider), settings)
}

#[tokio::test]
async fn test_standard_composition() {
    let composer = static_composer(Arc::new(TablePrices::standard())).with_narrator(Arc::new(EchoNarrator));
    let mut request = ComposeRequest::new(
        10_000.0,
        AllocationTarget::from_pairs([("value", 40.0), ("growth", 40.0), ("bonds", 20.0)]),
    );
    request.narrative = Some(true);
    request.language = Some("en".into());

    let response = composer.compose(&request).await.unwrap();

    let tickers: Vec<_> = response.lines.iter().map(|l| l.ticker.as_str()).collect();
    assert_eq!(tickers, ["AGG", "NVDA", "AMZN", "GOOGL", "JNJ", "PG", "JPM"]);

    let agg = &response.lines[0];
    assert_eq!(agg.amount, 2000.0);
    assert_eq!(agg.shares, 20.0);
    assert_eq!(agg.price_source, PriceSource::Live);

    let jnj = &response.lines[4];
    assert_eq!(jnj.amount, 1333.33);
    assert_eq!(jnj.shares, 8.0);

    let invested: f64 = response.lines.iter().map(|l| l.amount).sum();
    assert!(invested <= 10_000.0);
    assert!((response.unallocated - 0.02).abs() < 1e-9);

    let weights: f64 = response.lines.iter().map(|l| l.weight).sum();
    assert!((weights - 1.0).abs() < 1e-9);
    assert!((response.metrics.expected_return - 0.076).abs() < 1e-9);
    assert!((response.metrics.volatility - 0.17).abs() < 1e-9);

    assert!(response.warnings.is_empty(), "{:?}", response.warnings);
    assert_eq!(response.narrative.as_deref(), Some("7 positions (en)"));
}

#[tokio::test]
async fn test_unpriced_instrument_is_excluded() {
    let mut prices = TablePrices::standard();
    prices.0.remove("PG");
    let composer = static_composer(Arc::new(prices));

    let response = composer
        .compose(&ComposeRequest::new(10_000.0, AllocationTarget::default()))
        .await
        .unwrap();

    assert_eq!(response.lines.len(), 6);
    assert!(response.lines.iter().all(|l| l.ticker != "PG"));
    assert!(response.warnings.iter().any(|w| w.starts_with("PG (value)")));
    assert!(response.unallocated >= 1333.33);
}

#[tokio::test]
async fn test_degraded_pricing_uses_fallback_table() {
    let composer = static_composer(Arc::new(offline_client(FailurePolicy::DegradeToFallback)));
    let request = ComposeRequest::new(1000.0, AllocationTarget::from_pairs([("bonds", 100.0)]));

    let response = composer.compose(&request).await.unwrap();

    assert_eq!(response.lines.len(), 1);
    assert_eq!(response.lines[0].price, 95.0);
    assert_eq!(response.lines[0].price_source, PriceSource::Fallback);
    assert_eq!(response.lines[0].shares, 10.0);
    assert!(response.warnings.iter().any(|w| w.contains("fallback")));
}

#[tokio::test]
async fn test_strict_pricing_failure_is_empty_portfolio() {
    let composer = static_composer(Arc::new(offline_client(FailurePolicy::Strict)));
    let request = ComposeRequest::new(1000.0, AllocationTarget::from_pairs([("bonds", 100.0)]));

    let err = composer.compose(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyPortfolio);
}

#[tokio::test]
async fn test_hard_errors_render_as_structured_body() {
    let composer = static_composer(Arc::new(TablePrices::standard()));
    let request = ComposeRequest::new(
        1000.0,
        AllocationTarget::from_pairs([("value", 0.0), ("growth", 0.0)]),
    );

    let err = composer.compose(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAllocation);

    let body = serde_json::to_value(err.to_body()).unwrap();
    assert_eq!(body["kind"], "invalid_allocation");
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
}
