//! Portfolio composition
//!
//! Orchestrates one request end to end:
//! discovery per bucket -> ticker validation -> allocation -> optional narrative.
//! Only the allocation itself can fail the request; everything else degrades to warnings.

use crate::ai::claude::ClaudeNarrator;
use crate::ai::{NarrativeAnalyzer, NarrativeRequest};
use crate::allocation::{
    AllocationEngine, AllocationLine, AllocationTarget, PortfolioMetrics, PriceLookup, Warning,
};
use crate::config::{AllocationConfig, AppConfig};
use crate::discovery::{self, InstrumentDiscovery};
use crate::error::ComposerError;
use crate::models::{normalize_ticker, Instrument};
use crate::quotes::MarketDataClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    pub amount: f64,
    /// Defaults to value 40 / growth 40 / bonds 20
    #[serde(default, alias = "target_alloc")]
    pub target_alloc: Option<AllocationTarget>,
    #[serde(default)]
    pub region: Option<String>,
    /// Overrides the configured default
    #[serde(default)]
    pub narrative: Option<bool>,
    #[serde(default)]
    pub language: Option<String>,
}

impl ComposeRequest {
    pub fn new(amount: f64, target_alloc: AllocationTarget) -> Self {
        Self {
            amount,
            target_alloc: Some(target_alloc),
            region: None,
            narrative: None,
            language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeResponse {
    pub amount: f64,
    /// Normalized bucket fractions
    pub target: BTreeMap<String, f64>,
    pub lines: Vec<AllocationLine>,
    pub metrics: PortfolioMetrics,
    pub warnings: Vec<String>,
    pub invested: f64,
    pub unallocated: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    pub generated_at: DateTime<Utc>,
}

pub struct PortfolioComposer {
    discovery: Arc<dyn InstrumentDiscovery>,
    prices: Arc<dyn PriceLookup>,
    narrator: Option<Arc<dyn NarrativeAnalyzer>>,
    engine: AllocationEngine,
    region: String,
    language: String,
    narrative_by_default: bool,
}

impl PortfolioComposer {
    pub fn new(
        discovery: Arc<dyn InstrumentDiscovery>,
        prices: Arc<dyn PriceLookup>,
        settings: AllocationConfig,
    ) -> Self {
        Self {
            discovery,
            prices,
            narrator: None,
            engine: AllocationEngine::new(settings),
            region: "EU,US".to_string(),
            language: "es".to_string(),
            narrative_by_default: false,
        }
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeAnalyzer>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_narrative_by_default(mut self, enabled: bool) -> Self {
        self.narrative_by_default = enabled;
        self
    }

    /// Wire up Alpha Vantage pricing, the configured discovery source and,
    /// when a key is present, the Claude narrator.
    pub fn from_config(config: &AppConfig) -> Result<Self, ComposerError> {
        let client = MarketDataClient::alpha_vantage(&config.market_data)?;
        let discovery = discovery::from_config(&config.discovery)?;

        let mut composer = Self::new(discovery, Arc::new(client), config.allocation.clone())
            .with_region(&config.discovery.region)
            .with_language(&config.narrative.language)
            .with_narrative_by_default(config.narrative.enabled);

        match config.narrative.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {
                let narrator =
                    ClaudeNarrator::new(key, &config.narrative.model, config.narrative.max_tokens)
                        .map_err(|e| ComposerError::invalid_credential("Claude", &e.message))?;
                composer = composer.with_narrator(Arc::new(narrator));
            }
            _ if config.narrative.enabled => {
                log::warn!("Narrative enabled but no Claude API key configured");
            }
            _ => {}
        }

        Ok(composer)
    }

    pub async fn compose(&self, request: &ComposeRequest) -> Result<ComposeResponse, ComposerError> {
        let amount = request.amount;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ComposerError::InvalidRequest(format!(
                "amount must be positive, got {}",
                amount
            )));
        }

        let target = request.target_alloc.clone().unwrap_or_default();
        let normalized = target.normalize(self.engine.settings().target_sum_policy)?;
        let region = request
            .region
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(&self.region);

        log::info!(
            "Composing {:.2} across {} buckets via {} discovery",
            amount,
            normalized.fractions().len(),
            self.discovery.name()
        );

        let mut warnings = Vec::new();
        let mut candidates = BTreeMap::new();
        for (bucket, fraction) in normalized.active_buckets() {
            let found = self.discover_bucket(bucket, amount * fraction, region, &mut warnings).await;
            candidates.insert(bucket.to_string(), found);
        }

        let outcome = self
            .engine
            .optimize(self.prices.as_ref(), amount, &target, &candidates)
            .await?;
        warnings.extend(outcome.warnings.iter().cloned());

        let wants_narrative = request.narrative.unwrap_or(self.narrative_by_default);
        let narrative = if wants_narrative {
            let language = request.language.as_deref().unwrap_or(&self.language);
            self.narrate(&outcome.lines, &outcome.metrics, language, &mut warnings)
                .await
        } else {
            None
        };

        Ok(ComposeResponse {
            amount,
            target: outcome.target.fractions().clone(),
            lines: outcome.lines,
            metrics: outcome.metrics,
            warnings: warnings.iter().map(Warning::to_string).collect(),
            invested: outcome.invested,
            unallocated: outcome.unallocated,
            narrative,
            generated_at: Utc::now(),
        })
    }

    /// Discovery failures and malformed tickers become warnings.
    async fn discover_bucket(
        &self,
        bucket: &str,
        bucket_amount: f64,
        region: &str,
        warnings: &mut Vec<Warning>,
    ) -> Vec<Instrument> {
        let found = match self.discovery.discover(bucket, bucket_amount, region).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Discovery failed for bucket {}: {:#}", bucket, e);
                warnings.push(Warning::bucket(bucket, format!("discovery failed: {}", e)));
                return Vec::new();
            }
        };

        let mut valid = Vec::with_capacity(found.len());
        for mut instrument in found {
            match normalize_ticker(&instrument.ticker) {
                Ok(symbol) => {
                    instrument.ticker = symbol;
                    instrument.bucket = bucket.to_string();
                    valid.push(instrument);
                }
                Err(e) => {
                    log::warn!("Dropping discovered ticker '{}': {}", instrument.ticker, e);
                    warnings.push(Warning::instrument(
                        bucket,
                        &instrument.ticker,
                        "dropped, invalid ticker symbol",
                    ));
                }
            }
        }
        valid
    }

    async fn narrate(
        &self,
        lines: &[AllocationLine],
        metrics: &PortfolioMetrics,
        language: &str,
        warnings: &mut Vec<Warning>,
    ) -> Option<String> {
        let Some(narrator) = &self.narrator else {
            warnings.push(Warning::general(
                "narrative unavailable: no narrative provider configured",
            ));
            return None;
        };

        let request = NarrativeRequest {
            lines,
            metrics: Some(metrics),
            language,
        };
        match narrator.analyze(request).await {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!("Narrative from {} failed: {}", narrator.name(), e);
                warnings.push(Warning::general(format!("narrative unavailable: {}", e.message)));
                None
            }
        }
    }
}
