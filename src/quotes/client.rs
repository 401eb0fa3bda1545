//! Market-data client: one explicit instance owning the response cache, the
//! rate-limit clock and the failure policy for a single provider.

use super::alphavantage::AlphaVantageProvider;
use super::cache::{CacheKey, Lookup, TtlCache};
use super::rate_limit::RateLimiter;
use super::{Fundamentals, HistoryPeriod, LatestQuote, MarketDataProvider, PriceHistory, PriceQuote};
use crate::config::{FailurePolicy, MarketDataConfig};
use crate::error::ComposerError;
use crate::models::normalize_ticker;
use std::sync::{Arc, Mutex, MutexGuard};

struct CacheState {
    prices: TtlCache<PriceQuote>,
    fundamentals: TtlCache<Fundamentals>,
    history: TtlCache<PriceHistory>,
}

pub struct MarketDataClient {
    provider: Arc<dyn MarketDataProvider>,
    settings: MarketDataConfig,
    limiter: RateLimiter,
    cache: Mutex<CacheState>,
}

impl MarketDataClient {
    pub fn new(provider: Arc<dyn MarketDataProvider>, settings: MarketDataConfig) -> Self {
        let cache = CacheState {
            prices: TtlCache::new(settings.price_ttl()),
            fundamentals: TtlCache::new(settings.fundamentals_ttl()),
            history: TtlCache::new(settings.history_ttl()),
        };
        Self {
            provider,
            limiter: RateLimiter::new(settings.min_request_interval()),
            cache: Mutex::new(cache),
            settings,
        }
    }

    /// Client backed by Alpha Vantage. Fails with `InvalidCredential` when no key is configured.
    pub fn alpha_vantage(settings: &MarketDataConfig) -> Result<Self, ComposerError> {
        let provider = AlphaVantageProvider::new(settings.api_key.as_deref(), settings.request_timeout())?;
        Ok(Self::new(Arc::new(provider), settings.clone()))
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.settings.failure_policy
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Number of outbound provider calls issued so far
    pub async fn outbound_calls(&self) -> u64 {
        self.limiter.request_count().await
    }

    // Cache contents stay usable even if a holder panicked.
    fn lock_cache(&self) -> MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Prices
    // ========================================================================

    pub async fn get_price(&self, ticker: &str) -> Result<PriceQuote, ComposerError> {
        let symbol = normalize_ticker(ticker)?;
        let key = CacheKey::price(&symbol);

        let cached = self.lock_cache().prices.lookup(&key);
        match cached {
            Lookup::Fresh(quote) => {
                log::debug!("Cache hit for {}", key);
                return Ok(quote.from_cache(false));
            }
            Lookup::Expired(_) => log::debug!("Cache entry expired for {}", key),
            Lookup::Missing => {}
        }

        match self.fetch_live_price(&symbol).await {
            Ok(quote) => {
                self.lock_cache().prices.insert(key, quote.clone());
                Ok(quote)
            }
            Err(err) => self.price_failure(&symbol, &key, err),
        }
    }

    /// Try the "latest quote" shape, then the "most recent daily close" shape.
    async fn fetch_live_price(&self, symbol: &str) -> Result<PriceQuote, ComposerError> {
        self.limiter.acquire(symbol).await;
        let first = self.provider.latest_quote(symbol).await.and_then(|q| valid_price(symbol, q));
        let first_err = match first {
            Ok(price) => return Ok(PriceQuote::live(symbol, price)),
            Err(e) => e,
        };
        log::debug!(
            "{} latest quote for {} failed ({}), trying daily close",
            self.provider_name(),
            symbol,
            first_err
        );

        self.limiter.acquire(symbol).await;
        let second = self
            .provider
            .latest_daily_close(symbol)
            .await
            .and_then(|q| valid_price(symbol, q));

        match second {
            Ok(price) => Ok(PriceQuote::live(symbol, price)),
            Err(second_err) => Err(combine_errors(symbol, first_err, second_err)),
        }
    }

    fn price_failure(
        &self,
        symbol: &str,
        key: &CacheKey,
        err: ComposerError,
    ) -> Result<PriceQuote, ComposerError> {
        match self.settings.failure_policy {
            FailurePolicy::Strict => {
                log::warn!("Price for {} unavailable: {}", symbol, err);
                Err(err)
            }
            FailurePolicy::DegradeToFallback => {
                if let Some(stale) = self.lock_cache().prices.get_stale(key) {
                    log::warn!(
                        "Serving expired cached price for {} ({}): {}",
                        symbol,
                        stale.price,
                        err
                    );
                    return Ok(stale.from_cache(true));
                }
                let price = self.settings.fallback_price_for(symbol);
                log::warn!(
                    "Using fallback placeholder price {} for {}: {}",
                    price,
                    symbol,
                    err
                );
                // Not cached: the next call retries the provider
                Ok(PriceQuote::fallback(symbol, price))
            }
        }
    }

    // ========================================================================
    // Fundamentals
    // ========================================================================

    pub async fn get_fundamentals(&self, ticker: &str) -> Result<Fundamentals, ComposerError> {
        let symbol = normalize_ticker(ticker)?;
        let key = CacheKey::fundamentals(&symbol);

        let cached = self.lock_cache().fundamentals.get(&key);
        if let Some(f) = cached {
            log::debug!("Cache hit for {}", key);
            return Ok(f);
        }

        self.limiter.acquire(&symbol).await;
        match self.provider.fundamentals(&symbol).await {
            Ok(f) => {
                self.lock_cache().fundamentals.insert(key, f.clone());
                Ok(f)
            }
            Err(err) => self.stale_or_error(&symbol, err, |c| c.fundamentals.get_stale(&key)),
        }
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn get_historical_prices(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<PriceHistory, ComposerError> {
        let symbol = normalize_ticker(ticker)?;
        let key = CacheKey::history(&symbol, period.as_str());

        let cached = self.lock_cache().history.get(&key);
        if let Some(h) = cached {
            log::debug!("Cache hit for {}", key);
            return Ok(h);
        }

        self.limiter.acquire(&symbol).await;
        match self.provider.history(&symbol, period).await {
            Ok(mut bars) if !bars.is_empty() => {
                bars.sort_by_key(|b| b.date);
                let history = PriceHistory {
                    ticker: symbol,
                    period,
                    bars,
                };
                self.lock_cache().history.insert(key, history.clone());
                Ok(history)
            }
            Ok(_) => {
                let err = ComposerError::data_unavailable(&symbol, "empty price history");
                self.stale_or_error(&symbol, err, |c| c.history.get_stale(&key))
            }
            Err(err) => self.stale_or_error(&symbol, err, |c| c.history.get_stale(&key)),
        }
    }

    /// Degrade policy may serve expired entries; nothing is ever synthesized.
    fn stale_or_error<T, F>(&self, symbol: &str, err: ComposerError, stale: F) -> Result<T, ComposerError>
    where
        F: FnOnce(&CacheState) -> Option<T>,
    {
        if self.settings.failure_policy == FailurePolicy::DegradeToFallback {
            let cache = self.lock_cache();
            if let Some(value) = stale(&cache) {
                log::warn!("Serving expired cached data for {}: {}", symbol, err);
                return Ok(value);
            }
        }
        log::warn!("Market data for {} unavailable: {}", symbol, err);
        Err(err)
    }
}

fn valid_price(symbol: &str, quote: LatestQuote) -> Result<f64, ComposerError> {
    let price = quote.quote.close;
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(ComposerError::data_unavailable(
            symbol,
            format!("invalid price {}", price),
        ))
    }
}

/// A provider-side rejection wins; otherwise report both causes.
fn combine_errors(symbol: &str, first: ComposerError, second: ComposerError) -> ComposerError {
    match (first, second) {
        (_, e @ ComposerError::RateLimitExceeded { .. }) => e,
        (e @ ComposerError::RateLimitExceeded { .. }, _) => e,
        (first, second) => ComposerError::data_unavailable(
            symbol,
            format!("latest quote: {}; daily close: {}", first, second),
        ),
    }
}
