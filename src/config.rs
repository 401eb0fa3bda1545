//! Application configuration
//!
//! Loaded from an optional JSON file (camelCase keys, every field defaulted) and
//! then overlaid with environment variables for secrets and the failure policy.

use crate::error::ComposerError;
use crate::models::normalize_ticker;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_ALPHAVANTAGE_KEY: &str = "ALPHAVANTAGE_API_KEY";
pub const ENV_PERPLEXITY_KEY: &str = "PERPLEXITY_API_KEY";
pub const ENV_CLAUDE_KEY: &str = "CLAUDE_API_KEY";
pub const ENV_ANTHROPIC_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_FAILURE_POLICY: &str = "COMPOSER_FAILURE_POLICY";

// ============================================================================
// Policies
// ============================================================================

/// What the market-data client does when every live attempt fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Strict,
    DegradeToFallback,
}

impl FromStr for FailurePolicy {
    type Err = ComposerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "degrade_to_fallback" | "degrade" | "fallback" => Ok(Self::DegradeToFallback),
            other => Err(ComposerError::Config(format!(
                "unknown failure policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharePolicy {
    /// Floor to whole shares
    #[default]
    Whole,
    /// Fractional shares, six decimals
    Fractional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSumPolicy {
    /// Divide every percentage by the total
    #[default]
    Normalize,
    /// Reject targets that do not add up to 100
    RequireHundred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryProviderKind {
    #[default]
    Static,
    Perplexity,
}

/// Static return/risk assumption for a bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAssumption {
    pub expected_return: f64,
    pub volatility: f64,
}

impl BucketAssumption {
    pub const fn new(expected_return: f64, volatility: f64) -> Self {
        Self {
            expected_return,
            volatility,
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub market_data: MarketDataConfig,
    pub allocation: AllocationConfig,
    pub discovery: DiscoveryConfig,
    pub narrative: NarrativeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketDataConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub min_request_interval_secs: u64,
    pub price_ttl_secs: u64,
    pub fundamentals_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub failure_policy: FailurePolicy,
    /// Placeholder prices used only under `degrade_to_fallback`
    pub fallback_prices: BTreeMap<String, f64>,
    pub default_fallback_price: f64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        let fallback_prices = [
            ("AAPL", 175.34),
            ("MSFT", 402.78),
            ("JNJ", 147.56),
            ("V", 275.96),
            ("JPM", 198.47),
            ("VOO", 470.15),
            ("QQQ", 438.27),
            ("SPY", 468.32),
            ("VTI", 252.18),
            ("AGG", 108.45),
            ("BND", 72.36),
        ]
        .into_iter()
        .map(|(t, p)| (t.to_string(), p))
        .collect();

        Self {
            api_key: None,
            min_request_interval_secs: 12,
            price_ttl_secs: 900,
            fundamentals_ttl_secs: 86_400,
            history_ttl_secs: 14_400,
            request_timeout_secs: 15,
            failure_policy: FailurePolicy::Strict,
            fallback_prices,
            default_fallback_price: 100.0,
        }
    }
}

impl MarketDataConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs(self.min_request_interval_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }

    pub fn fundamentals_ttl(&self) -> Duration {
        Duration::from_secs(self.fundamentals_ttl_secs)
    }

    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Uppercase fallback table keys so they match normalized symbols.
    pub fn normalize_fallback_prices(&mut self) -> Result<(), ComposerError> {
        let mut normalized = BTreeMap::new();
        for (raw, price) in std::mem::take(&mut self.fallback_prices) {
            let symbol = normalize_ticker(&raw)
                .map_err(|e| ComposerError::Config(format!("fallbackPrices: {}", e)))?;
            if normalized.insert(symbol.clone(), price).is_some() {
                return Err(ComposerError::Config(format!(
                    "fallbackPrices lists {} more than once",
                    symbol
                )));
            }
        }
        self.fallback_prices = normalized;
        Ok(())
    }

    pub fn fallback_price_for(&self, ticker: &str) -> f64 {
        self.fallback_prices
            .get(ticker)
            .copied()
            .unwrap_or(self.default_fallback_price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AllocationConfig {
    pub share_policy: SharePolicy,
    pub target_sum_policy: TargetSumPolicy,
    pub risk_free_rate: f64,
    pub bucket_assumptions: BTreeMap<String, BucketAssumption>,
    /// Used for buckets without an entry in `bucket_assumptions`
    pub default_assumption: BucketAssumption,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        let bucket_assumptions = [
            ("value", BucketAssumption::new(0.07, 0.15)),
            ("growth", BucketAssumption::new(0.10, 0.25)),
            ("bonds", BucketAssumption::new(0.04, 0.05)),
            ("disruptive", BucketAssumption::new(0.15, 0.35)),
        ]
        .into_iter()
        .map(|(b, a)| (b.to_string(), a))
        .collect();

        Self {
            share_policy: SharePolicy::Whole,
            target_sum_policy: TargetSumPolicy::Normalize,
            risk_free_rate: 0.02,
            bucket_assumptions,
            default_assumption: BucketAssumption::new(0.06, 0.20),
        }
    }
}

impl AllocationConfig {
    pub fn assumption_for(&self, bucket: &str) -> BucketAssumption {
        self.bucket_assumptions
            .get(bucket)
            .copied()
            .unwrap_or(self.default_assumption)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoveryConfig {
    pub provider: DiscoveryProviderKind,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub region: String,
    pub instruments_per_bucket: BTreeMap<String, usize>,
    pub default_instruments_per_bucket: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let instruments_per_bucket = [("value", 3), ("growth", 3), ("bonds", 1), ("disruptive", 3)]
            .into_iter()
            .map(|(b, n)| (b.to_string(), n))
            .collect();

        Self {
            provider: DiscoveryProviderKind::Static,
            api_key: None,
            model: "sonar-pro".to_string(),
            region: "EU,US".to_string(),
            instruments_per_bucket,
            default_instruments_per_bucket: 3,
        }
    }
}

impl DiscoveryConfig {
    pub fn instruments_for(&self, bucket: &str) -> usize {
        self.instruments_per_bucket
            .get(bucket)
            .copied()
            .unwrap_or(self.default_instruments_per_bucket)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NarrativeConfig {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub language: String,
    pub max_tokens: u32,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: "claude-sonnet-4-5-20250514".to_string(),
            language: "es".to_string(),
            max_tokens: 800,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl AppConfig {
    /// Load configuration from an optional JSON file, then overlay the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.market_data.normalize_fallback_prices()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Overlay values from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ComposerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_ALPHAVANTAGE_KEY) {
            self.market_data.api_key = Some(key);
        }
        if let Some(key) = get(ENV_PERPLEXITY_KEY) {
            self.discovery.api_key = Some(key);
        }
        if let Some(key) = get(ENV_CLAUDE_KEY).or_else(|| get(ENV_ANTHROPIC_KEY)) {
            self.narrative.api_key = Some(key);
        }
        if let Some(policy) = get(ENV_FAILURE_POLICY) {
            self.market_data.failure_policy = policy.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ComposerError> {
        let md = &self.market_data;
        if md.request_timeout_secs == 0 {
            return Err(ComposerError::Config(
                "requestTimeoutSecs must be positive".into(),
            ));
        }
        if !(md.default_fallback_price.is_finite() && md.default_fallback_price > 0.0) {
            return Err(ComposerError::Config(
                "defaultFallbackPrice must be a positive number".into(),
            ));
        }
        if let Some((ticker, _)) = md
            .fallback_prices
            .iter()
            .find(|(_, p)| !(p.is_finite() && **p > 0.0))
        {
            return Err(ComposerError::Config(format!(
                "fallback price for {} must be positive",
                ticker
            )));
        }

        let alloc = &self.allocation;
        if !(alloc.risk_free_rate.is_finite() && alloc.risk_free_rate >= 0.0) {
            return Err(ComposerError::Config(
                "riskFreeRate must be non-negative".into(),
            ));
        }
        let assumptions = alloc
            .bucket_assumptions
            .iter()
            .map(|(b, a)| (b.as_str(), a))
            .chain(std::iter::once(("default", &alloc.default_assumption)));
        for (bucket, a) in assumptions {
            if !(a.volatility.is_finite() && a.volatility >= 0.0) || !a.expected_return.is_finite() {
                return Err(ComposerError::Config(format!(
                    "invalid assumption for bucket '{}'",
                    bucket
                )));
            }
        }

        if self.narrative.max_tokens == 0 {
            return Err(ComposerError::Config("maxTokens must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.market_data.min_request_interval(), Duration::from_secs(12));
        assert_eq!(config.market_data.price_ttl_secs, 900);
        assert_eq!(config.market_data.fundamentals_ttl_secs, 86_400);
        assert_eq!(config.market_data.failure_policy, FailurePolicy::Strict);
        assert_eq!(config.allocation.risk_free_rate, 0.02);
        assert_eq!(config.allocation.assumption_for("bonds"), BucketAssumption::new(0.04, 0.05));
        assert_eq!(config.allocation.assumption_for("crypto"), BucketAssumption::new(0.06, 0.20));
        assert_eq!(config.discovery.instruments_for("bonds"), 1);
        assert_eq!(config.discovery.instruments_for("other"), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fallback_price_lookup() {
        let md = MarketDataConfig::default();
        assert_eq!(md.fallback_price_for("AAPL"), 175.34);
        assert_eq!(md.fallback_price_for("ZZZZ"), 100.0);
    }

    #[test]
    fn test_apply_env() {
        let env: HashMap<&str, &str> = [
            (ENV_ALPHAVANTAGE_KEY, "av-key"),
            (ENV_ANTHROPIC_KEY, "anthropic-key"),
            (ENV_PERPLEXITY_KEY, "  "),
            (ENV_FAILURE_POLICY, "degrade_to_fallback"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.market_data.api_key.as_deref(), Some("av-key"));
        assert_eq!(config.narrative.api_key.as_deref(), Some("anthropic-key"));
        assert!(config.discovery.api_key.is_none());
        assert_eq!(config.market_data.failure_policy, FailurePolicy::DegradeToFallback);
    }

    #[test]
    fn test_apply_env_rejects_unknown_policy() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|k| (k == ENV_FAILURE_POLICY).then(|| "sometimes".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "marketData": {{ "minRequestIntervalSecs": 0, "failurePolicy": "degrade_to_fallback" }},
                "allocation": {{ "sharePolicy": "fractional", "riskFreeRate": 0.03 }}
            }}"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.market_data.min_request_interval_secs, 0);
        assert_eq!(config.market_data.price_ttl_secs, 900);
        assert_eq!(config.market_data.failure_policy, FailurePolicy::DegradeToFallback);
        assert_eq!(config.allocation.share_policy, SharePolicy::Fractional);
        assert_eq!(config.allocation.risk_free_rate, 0.03);
        assert_eq!(config.discovery.model, "sonar-pro");
    }

    #[test]
    fn test_from_file_uppercases_fallback_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "marketData": {{ "fallbackPrices": {{ "aapl": 175.0, " brk.b ": 410.0 }} }} }}"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.market_data.fallback_price_for("AAPL"), 175.0);
        assert_eq!(config.market_data.fallback_price_for("BRK.B"), 410.0);
        assert!(!config.market_data.fallback_prices.contains_key("aapl"));
    }

    #[test]
    fn test_fallback_keys_rejected_when_invalid_or_duplicated() {
        let mut md = MarketDataConfig {
            fallback_prices: [("AAPL".to_string(), 1.0), ("aapl".to_string(), 2.0)]
                .into_iter()
                .collect(),
            ..MarketDataConfig::default()
        };
        let err = md.normalize_fallback_prices().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);

        let mut md = MarketDataConfig {
            fallback_prices: [("BAD TICKER".to_string(), 1.0)].into_iter().collect(),
            ..MarketDataConfig::default()
        };
        assert!(md.normalize_fallback_prices().is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_validate_rejects_negative_volatility() {
        let mut config = AppConfig::default();
        config
            .allocation
            .bucket_assumptions
            .insert("value".into(), BucketAssumption::new(0.07, -0.1));
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.allocation.risk_free_rate = -0.01;
        assert!(config.validate().is_err());
    }
}
