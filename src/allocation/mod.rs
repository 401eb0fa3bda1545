//! Allocation Engine
//!
//! Turns a cash amount, a bucket target and per-bucket candidates into concrete
//! position lines:
//! - Target normalization (percentages to fractions)
//! - Equal split or hint-weighted split within a bucket
//! - Price lookup with per-instrument exclusion
//! - Share rounding (whole or fractional)
//! - Portfolio risk/return metrics

pub mod metrics;

use crate::config::{AllocationConfig, SharePolicy, TargetSumPolicy};
use crate::error::ComposerError;
use crate::models::{normalize_bucket, Instrument, Metrics};
use crate::quotes::{MarketDataClient, PriceQuote, PriceSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tolerance for `require_hundred` target sums
pub const TARGET_SUM_TOLERANCE: f64 = 0.01;

// ============================================================================
// Data Types
// ============================================================================

/// Bucket -> percentage of the total amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationTarget(BTreeMap<String, f64>);

impl AllocationTarget {
    pub fn new(percentages: BTreeMap<String, f64>) -> Self {
        Self(percentages)
    }

    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn percentages(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    /// Validate and convert to fractions summing to 1.
    pub fn normalize(&self, policy: TargetSumPolicy) -> Result<NormalizedTarget, ComposerError> {
        let mut buckets = BTreeMap::new();

        for (label, pct) in &self.0 {
            let bucket = normalize_bucket(label);
            if bucket.is_empty() {
                return Err(ComposerError::InvalidAllocation("empty bucket label".into()));
            }
            if !pct.is_finite() || *pct < 0.0 {
                return Err(ComposerError::InvalidAllocation(format!(
                    "percentage for '{}' must be non-negative, got {}",
                    bucket, pct
                )));
            }
            if *pct > 100.0 {
                return Err(ComposerError::InvalidAllocation(format!(
                    "percentage for '{}' exceeds 100",
                    bucket
                )));
            }
            if buckets.insert(bucket.clone(), *pct).is_some() {
                return Err(ComposerError::InvalidAllocation(format!(
                    "bucket '{}' given more than once",
                    bucket
                )));
            }
        }

        let sum: f64 = buckets.values().sum();
        if sum <= 0.0 {
            return Err(ComposerError::InvalidAllocation(
                "target percentages sum to zero".into(),
            ));
        }
        if policy == TargetSumPolicy::RequireHundred && (sum - 100.0).abs() > TARGET_SUM_TOLERANCE {
            return Err(ComposerError::InvalidAllocation(format!(
                "target percentages sum to {}, expected 100",
                sum
            )));
        }

        Ok(NormalizedTarget(
            buckets.into_iter().map(|(b, pct)| (b, pct / sum)).collect(),
        ))
    }
}

impl Default for AllocationTarget {
    fn default() -> Self {
        Self::from_pairs([("value", 40.0), ("growth", 40.0), ("bonds", 20.0)])
    }
}

/// Bucket -> fraction, fractions sum to 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedTarget(BTreeMap<String, f64>);

impl NormalizedTarget {
    pub fn fraction(&self, bucket: &str) -> f64 {
        self.0.get(bucket).copied().unwrap_or(0.0)
    }

    pub fn fractions(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    /// Buckets that receive money, in name order
    pub fn active_buckets(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0
            .iter()
            .filter(|(_, f)| **f > 0.0)
            .map(|(b, f)| (b.as_str(), *f))
    }
}

/// One concrete position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationLine {
    pub ticker: String,
    pub name: Option<String>,
    pub bucket: String,
    /// Fraction of the total amount
    pub weight: f64,
    pub amount: f64,
    pub shares: f64,
    pub price: f64,
    pub price_source: PriceSource,
    pub metrics: Metrics,
}

impl AllocationLine {
    pub fn price_source_label(&self) -> &'static str {
        match self.price_source {
            PriceSource::Live => "live",
            PriceSource::Cached => "cached",
            PriceSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioMetrics {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

/// Non-fatal issue encountered while allocating
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub bucket: Option<String>,
    pub ticker: Option<String>,
    pub reason: String,
}

impl Warning {
    pub fn bucket(bucket: &str, reason: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.to_string()),
            ticker: None,
            reason: reason.into(),
        }
    }

    pub fn instrument(bucket: &str, ticker: &str, reason: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.to_string()),
            ticker: Some(ticker.to_string()),
            reason: reason.into(),
        }
    }

    pub fn general(reason: impl Into<String>) -> Self {
        Self {
            bucket: None,
            ticker: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.bucket, &self.ticker) {
            (Some(b), Some(t)) => write!(f, "{} ({}): {}", t, b, self.reason),
            (Some(b), None) => write!(f, "{}: {}", b, self.reason),
            (None, Some(t)) => write!(f, "{}: {}", t, self.reason),
            (None, None) => f.write_str(&self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationOutcome {
    pub target: NormalizedTarget,
    pub lines: Vec<AllocationLine>,
    pub metrics: PortfolioMetrics,
    pub warnings: Vec<Warning>,
    pub invested: f64,
    pub unallocated: f64,
}

// ============================================================================
// Pricing seam
// ============================================================================

/// Source of prices for the engine
#[async_trait]
pub trait PriceLookup: Send + Sync {
    async fn price(&self, ticker: &str) -> Result<PriceQuote, ComposerError>;
}

#[async_trait]
impl PriceLookup for MarketDataClient {
    async fn price(&self, ticker: &str) -> Result<PriceQuote, ComposerError> {
        self.get_price(ticker).await
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Round down to whole cents so rounded amounts never exceed their source.
pub fn floor_cents(value: f64) -> f64 {
    let floored = ((value * 100.0) + 1e-6).floor() / 100.0;
    // The bias absorbs binary noise but must not round up past the input
    if floored > value {
        (value * 100.0).floor() / 100.0
    } else {
        floored
    }
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Within-bucket weights: normalized hints when every candidate has one, else equal.
pub fn instrument_weights(candidates: &[Instrument]) -> Vec<f64> {
    let hints: Option<Vec<f64>> = candidates.iter().map(Instrument::usable_hint).collect();
    match hints {
        Some(hints) if !hints.is_empty() => {
            let total: f64 = hints.iter().sum();
            hints.into_iter().map(|h| h / total).collect()
        }
        _ => {
            let n = candidates.len() as f64;
            vec![1.0 / n; candidates.len()]
        }
    }
}

pub struct AllocationEngine {
    settings: AllocationConfig,
}

impl AllocationEngine {
    pub fn new(settings: AllocationConfig) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AllocationConfig {
        &self.settings
    }

    fn shares_for(&self, amount: f64, price: f64) -> f64 {
        let raw = amount / price;
        match self.settings.share_policy {
            SharePolicy::Whole => (raw + 1e-9).floor(),
            SharePolicy::Fractional => (raw * 1e6).floor() / 1e6,
        }
    }

    /// Allocate `total_amount` across `candidates` according to `target`.
    ///
    /// `candidates` maps bucket labels to instruments in discovery order. Buckets
    /// without candidates and instruments without a price are reported as warnings;
    /// their share of the money stays unallocated.
    pub async fn optimize(
        &self,
        prices: &dyn PriceLookup,
        total_amount: f64,
        target: &AllocationTarget,
        candidates: &BTreeMap<String, Vec<Instrument>>,
    ) -> Result<AllocationOutcome, ComposerError> {
        if !total_amount.is_finite() || total_amount <= 0.0 {
            return Err(ComposerError::InvalidRequest(format!(
                "amount must be positive, got {}",
                total_amount
            )));
        }

        let normalized = target.normalize(self.settings.target_sum_policy)?;
        let candidates: BTreeMap<String, &Vec<Instrument>> = candidates
            .iter()
            .map(|(bucket, list)| (normalize_bucket(bucket), list))
            .collect();

        let mut lines = Vec::new();
        let mut warnings = Vec::new();
        let mut any_candidates = false;

        for (bucket, fraction) in normalized.active_buckets() {
            let list = match candidates.get(bucket) {
                Some(list) if !list.is_empty() => *list,
                _ => {
                    log::warn!("No candidates available for bucket {}", bucket);
                    warnings.push(Warning::bucket(bucket, "no candidates available"));
                    continue;
                }
            };
            any_candidates = true;

            let bucket_amount = total_amount * fraction;
            log::debug!(
                "Allocating {:.2} to bucket {} across {} instruments",
                bucket_amount,
                bucket,
                list.len()
            );

            for (instrument, weight) in list.iter().zip(instrument_weights(list)) {
                let quote = match prices.price(&instrument.ticker).await {
                    Ok(q) => q,
                    Err(e) => {
                        log::warn!("Excluding {} from bucket {}: {}", instrument.ticker, bucket, e);
                        warnings.push(Warning::instrument(
                            bucket,
                            &instrument.ticker,
                            format!("excluded, price unavailable: {}", e),
                        ));
                        continue;
                    }
                };

                if quote.source == PriceSource::Fallback {
                    warnings.push(Warning::instrument(
                        bucket,
                        &quote.ticker,
                        format!("priced with fallback placeholder {:.2}", quote.price),
                    ));
                } else if quote.stale {
                    warnings.push(Warning::instrument(
                        bucket,
                        &quote.ticker,
                        "priced with expired cached data",
                    ));
                }

                let amount = floor_cents(bucket_amount * weight);
                let shares = self.shares_for(amount, quote.price);
                if shares == 0.0 {
                    warnings.push(Warning::instrument(
                        bucket,
                        &quote.ticker,
                        format!("amount {:.2} buys no shares at {:.2}", amount, quote.price),
                    ));
                }

                lines.push(AllocationLine {
                    ticker: quote.ticker.clone(),
                    name: instrument.name.clone(),
                    bucket: bucket.to_string(),
                    weight: fraction * weight,
                    amount,
                    shares,
                    price: quote.price,
                    price_source: quote.source,
                    metrics: instrument.metrics.clone(),
                });
            }
        }

        if !any_candidates {
            return Err(ComposerError::EmptyPortfolio(
                "no candidates available for any bucket".into(),
            ));
        }
        if lines.is_empty() {
            return Err(ComposerError::EmptyPortfolio(
                "no instrument could be priced".into(),
            ));
        }

        let metrics = metrics::portfolio_metrics(&lines, &self.settings);
        let invested: f64 = lines.iter().map(|l| l.amount).sum();
        let unallocated = round_cents((total_amount - invested).max(0.0));

        log::info!(
            "Allocated {:.2} of {:.2} across {} positions ({} warnings)",
            invested,
            total_amount,
            lines.len(),
            warnings.len()
        );

        Ok(AllocationOutcome {
            target: normalized,
            lines,
            metrics,
            warnings,
            invested: round_cents(invested),
            unallocated,
        })
    }
}
