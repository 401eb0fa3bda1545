//! Instrument discovery
//!
//! Proposes candidate instruments per bucket. Two sources:
//! - Static: a built-in universe of well-known US listings
//! - Perplexity: web-grounded LLM research (API key required)

pub mod parsing;
pub mod perplexity;

use crate::config::{DiscoveryConfig, DiscoveryProviderKind};
use crate::error::ComposerError;
use crate::models::{normalize_bucket, Instrument};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Source of candidate instruments for a bucket.
///
/// Failures are reported as errors; callers treat them as "zero candidates".
#[async_trait]
pub trait InstrumentDiscovery: Send + Sync {
    fn name(&self) -> &str;

    async fn discover(&self, bucket: &str, amount: f64, region_filter: &str) -> Result<Vec<Instrument>>;
}

/// (ticker, name) per bucket
const STATIC_UNIVERSE: &[(&str, &[(&str, &str)])] = &[
    (
        "value",
        &[
            ("JNJ", "Johnson & Johnson"),
            ("PG", "Procter & Gamble"),
            ("JPM", "JPMorgan Chase & Co."),
            ("KO", "The Coca-Cola Company"),
            ("XOM", "Exxon Mobil Corporation"),
        ],
    ),
    (
        "growth",
        &[
            ("NVDA", "NVIDIA Corporation"),
            ("AMZN", "Amazon.com Inc."),
            ("GOOGL", "Alphabet Inc."),
            ("META", "Meta Platforms Inc."),
            ("TSLA", "Tesla Inc."),
        ],
    ),
    (
        "bonds",
        &[
            ("AGG", "iShares Core US Aggregate Bond ETF"),
            ("BND", "Vanguard Total Bond Market ETF"),
            ("VCIT", "Vanguard Intermediate-Term Corporate Bond ETF"),
            ("LQD", "iShares iBoxx $ Investment Grade Corporate Bond ETF"),
            ("TIP", "iShares TIPS Bond ETF"),
        ],
    ),
    (
        "disruptive",
        &[
            ("ARKK", "ARK Innovation ETF"),
            ("BOTZ", "Global X Robotics & Artificial Intelligence ETF"),
            ("SOXX", "iShares Semiconductor ETF"),
            ("ICLN", "iShares Global Clean Energy ETF"),
        ],
    ),
];

/// Built-in universe, truncated to the configured count per bucket
pub struct StaticDiscovery {
    settings: DiscoveryConfig,
}

impl StaticDiscovery {
    pub fn new(settings: DiscoveryConfig) -> Self {
        Self { settings }
    }

    pub fn known_buckets() -> impl Iterator<Item = &'static str> {
        STATIC_UNIVERSE.iter().map(|(bucket, _)| *bucket)
    }
}

#[async_trait]
impl InstrumentDiscovery for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn discover(&self, bucket: &str, _amount: f64, region_filter: &str) -> Result<Vec<Instrument>> {
        let bucket = normalize_bucket(bucket);
        let (_, universe) = STATIC_UNIVERSE
            .iter()
            .find(|(b, _)| *b == bucket)
            .ok_or_else(|| anyhow!("No static universe for bucket '{}'", bucket))?;

        log::debug!(
            "Static discovery for {} (region filter '{}' not applied, universe is US-listed)",
            bucket,
            region_filter
        );

        Ok(universe
            .iter()
            .take(self.settings.instruments_for(&bucket))
            .map(|(ticker, name)| Instrument::new(ticker, &bucket).with_name(name))
            .collect())
    }
}

/// Build the configured discovery source.
pub fn from_config(settings: &DiscoveryConfig) -> Result<Arc<dyn InstrumentDiscovery>, ComposerError> {
    match settings.provider {
        DiscoveryProviderKind::Static => Ok(Arc::new(StaticDiscovery::new(settings.clone()))),
        DiscoveryProviderKind::Perplexity => {
            let discovery = perplexity::PerplexityDiscovery::new(settings)?;
            Ok(Arc::new(discovery))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_discovery_respects_counts() {
        let discovery = StaticDiscovery::new(DiscoveryConfig::default());

        let value = discovery.discover("value", 4000.0, "EU,US").await.unwrap();
        let tickers: Vec<_> = value.iter().map(|i| i.ticker.as_str()).collect();
        assert_eq!(tickers, ["JNJ", "PG", "JPM"]);
        assert!(value.iter().all(|i| i.bucket == "value" && i.name.is_some()));

        let bonds = discovery.discover(" Bonds ", 2000.0, "US").await.unwrap();
        assert_eq!(bonds.len(), 1);
        assert_eq!(bonds[0].ticker, "AGG");
    }

    #[tokio::test]
    async fn test_static_discovery_caps_at_universe_size() {
        let mut settings = DiscoveryConfig::default();
        settings.instruments_per_bucket.insert("disruptive".into(), 10);
        let discovery = StaticDiscovery::new(settings);
        assert_eq!(discovery.discover("disruptive", 1.0, "").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_bucket_is_error() {
        let discovery = StaticDiscovery::new(DiscoveryConfig::default());
        assert!(discovery.discover("crypto", 1000.0, "US").await.is_err());
    }

    #[test]
    fn test_from_config() {
        let static_source = from_config(&DiscoveryConfig::default()).unwrap();
        assert_eq!(static_source.name(), "static");

        let settings = DiscoveryConfig {
            provider: DiscoveryProviderKind::Perplexity,
            ..DiscoveryConfig::default()
        };
        let err = from_config(&settings).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidCredential);
    }

    #[test]
    fn test_known_buckets() {
        let buckets: Vec<_> = StaticDiscovery::known_buckets().collect();
        assert_eq!(buckets, ["value", "growth", "bonds", "disruptive"]);
    }
}
