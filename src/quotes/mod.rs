//! Market data framework
//!
//! - `MarketDataProvider`: the seam to an external quote source
//! - Alpha Vantage (stocks, ETFs - API key required)
//! - `MarketDataClient`: caching, rate limiting and failure policy on top of a provider

pub mod alphavantage;
pub mod cache;
pub mod client;
pub mod rate_limit;

pub use client::MarketDataClient;

use crate::error::ComposerError;
use crate::models::Metrics;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Single price data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub date: NaiveDate,
    pub close: f64,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub open: Option<f64>,
    pub volume: Option<i64>,
}

/// Latest price with metadata, as returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestQuote {
    pub symbol: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub quote: Quote,
}

/// Where a price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Live,
    Cached,
    Fallback,
}

/// Price handed to the allocation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub ticker: String,
    pub price: f64,
    pub source: PriceSource,
    pub observed_at: DateTime<Utc>,
    /// Served from cache after the TTL expired
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

impl PriceQuote {
    pub fn live(ticker: &str, price: f64) -> Self {
        Self {
            ticker: ticker.to_string(),
            price,
            source: PriceSource::Live,
            observed_at: Utc::now(),
            stale: false,
        }
    }

    pub fn fallback(ticker: &str, price: f64) -> Self {
        Self {
            source: PriceSource::Fallback,
            ..Self::live(ticker, price)
        }
    }

    pub(crate) fn from_cache(mut self, stale: bool) -> Self {
        self.source = PriceSource::Cached;
        self.stale = stale;
        self
    }

    /// Anything other than a fresh observation
    pub fn is_degraded(&self) -> bool {
        self.source == PriceSource::Fallback || self.stale
    }
}

/// Competitive-advantage estimate derived from margins and returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Moat {
    High,
    Medium,
    Low,
    Unknown,
}

impl Moat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unknown => "unknown",
        }
    }
}

/// Company fundamentals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fundamentals {
    pub ticker: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub metrics: Metrics,
    pub moat: Moat,
    pub additional: BTreeMap<String, Option<f64>>,
    pub observed_at: DateTime<Utc>,
}

impl Fundamentals {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied().flatten()
    }
}

/// Well-known metric keys
pub mod metric {
    pub const ROE: &str = "ROE";
    pub const PE: &str = "P/E";
    pub const PROFIT_MARGIN: &str = "profit_margin";
    pub const DEBT_RATIO: &str = "debt_ratio";
    pub const FCF_GROWTH: &str = "fcf_growth";
}

/// History window; determines series granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryPeriod {
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "3months")]
    ThreeMonths,
    #[serde(rename = "1year")]
    OneYear,
    #[serde(rename = "5years")]
    FiveYears,
}

impl HistoryPeriod {
    /// Unrecognized labels fall back to a one-month daily series.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "3months" | "3m" => Self::ThreeMonths,
            "1year" | "1y" => Self::OneYear,
            "5years" | "5y" => Self::FiveYears,
            _ => Self::OneMonth,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMonth => "1month",
            Self::ThreeMonths => "3months",
            Self::OneYear => "1year",
            Self::FiveYears => "5years",
        }
    }
}

impl Default for HistoryPeriod {
    fn default() -> Self {
        Self::OneMonth
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistory {
    pub ticker: String,
    pub period: HistoryPeriod,
    /// Ascending by date
    pub bars: Vec<Quote>,
}

/// External market-data source
///
/// Implementations perform exactly one outbound call per method and do not cache.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// "Latest quote" response shape
    async fn latest_quote(&self, symbol: &str) -> Result<LatestQuote, ComposerError>;

    /// "Most recent daily close" response shape
    async fn latest_daily_close(&self, symbol: &str) -> Result<LatestQuote, ComposerError>;

    async fn fundamentals(&self, symbol: &str) -> Result<Fundamentals, ComposerError>;

    async fn history(&self, symbol: &str, period: HistoryPeriod)
        -> Result<Vec<Quote>, ComposerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_period_parse() {
        assert_eq!(HistoryPeriod::parse("3months"), HistoryPeriod::ThreeMonths);
        assert_eq!(HistoryPeriod::parse("1Year"), HistoryPeriod::OneYear);
        assert_eq!(HistoryPeriod::parse("5years"), HistoryPeriod::FiveYears);
        assert_eq!(HistoryPeriod::parse("weird"), HistoryPeriod::OneMonth);
        assert_eq!(
            serde_json::to_value(HistoryPeriod::ThreeMonths).unwrap(),
            "3months"
        );
    }

    #[test]
    fn test_price_quote_flags() {
        let live = PriceQuote::live("AAPL", 10.0);
        assert!(!live.is_degraded());

        let cached = live.clone().from_cache(false);
        assert_eq!(cached.source, PriceSource::Cached);
        assert!(!cached.is_degraded());
        assert!(live.from_cache(true).is_degraded());

        assert!(PriceQuote::fallback("AAPL", 175.34).is_degraded());

        let json = serde_json::to_value(PriceQuote::fallback("X", 1.0)).unwrap();
        assert_eq!(json["source"], "fallback");
        assert!(json.get("stale").is_none());
    }
}
