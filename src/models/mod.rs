//! Shared domain types: instruments, buckets and ticker symbols.

use crate::error::ComposerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open metric mapping. `None` means the metric is unknown, never zero.
pub type Metrics = BTreeMap<String, Option<f64>>;

/// Maximum accepted ticker length (covers exchange suffixes like `NESN.SW`)
pub const MAX_TICKER_LEN: usize = 12;

/// A candidate instrument proposed for a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub ticker: String,
    pub name: Option<String>,
    pub bucket: String,
    #[serde(default)]
    pub metrics: Metrics,
    /// Relative weight within the bucket, any positive scale
    pub weight_hint: Option<f64>,
}

impl Instrument {
    pub fn new(ticker: &str, bucket: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: None,
            bucket: normalize_bucket(bucket),
            metrics: Metrics::new(),
            weight_hint: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_weight_hint(mut self, hint: f64) -> Self {
        self.weight_hint = Some(hint);
        self
    }

    pub fn with_metric(mut self, key: &str, value: Option<f64>) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    /// Positive, finite weight hint if one was supplied
    pub fn usable_hint(&self) -> Option<f64> {
        self.weight_hint.filter(|w| w.is_finite() && *w > 0.0)
    }
}

/// Bucket labels are compared lowercased and trimmed.
pub fn normalize_bucket(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Trim and uppercase a ticker, rejecting anything that is not a plausible symbol.
pub fn normalize_ticker(raw: &str) -> Result<String, ComposerError> {
    let symbol = raw.trim().to_uppercase();

    if symbol.is_empty() {
        return Err(ComposerError::InvalidRequest("ticker is empty".into()));
    }
    if symbol.len() > MAX_TICKER_LEN {
        return Err(ComposerError::InvalidRequest(format!(
            "ticker '{}' is longer than {} characters",
            symbol, MAX_TICKER_LEN
        )));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ComposerError::InvalidRequest(format!(
            "ticker '{}' contains invalid characters",
            symbol
        )));
    }
    if !symbol.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(ComposerError::InvalidRequest(format!(
            "ticker '{}' must start with a letter or digit",
            symbol
        )));
    }

    Ok(symbol)
}
