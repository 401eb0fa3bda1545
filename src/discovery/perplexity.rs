//! Perplexity-backed instrument discovery

use super::parsing::parse_instruments;
use super::InstrumentDiscovery;
use crate::ai::perplexity::PerplexityClient;
use crate::config::DiscoveryConfig;
use crate::error::ComposerError;
use crate::models::{normalize_bucket, Instrument};
use anyhow::{anyhow, Result};
use async_trait::async_trait;

const SYSTEM_PROMPT: &str = "You are a financial research assistant. \
Answer with a single bare JSON array and nothing else: no markdown, no commentary.";

pub struct PerplexityDiscovery {
    client: PerplexityClient,
    settings: DiscoveryConfig,
}

impl PerplexityDiscovery {
    pub fn new(settings: &DiscoveryConfig) -> Result<Self, ComposerError> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ComposerError::invalid_credential("Perplexity", "API key required"))?;
        let client = PerplexityClient::new(api_key, &settings.model)
            .map_err(|e| ComposerError::invalid_credential("Perplexity", &e.message))?;

        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }
}

/// Research prompt for a bucket
pub fn build_discovery_prompt(bucket: &str, count: usize, amount: f64, region: &str) -> String {
    let criteria = match bucket {
        "value" => format!(
            "{} large-cap value stocks listed in {} with ROE >= 12%, P/E <= 18 and debt/equity <= 0.6, \
             with a durable competitive advantage",
            count, region
        ),
        "growth" => format!(
            "{} small-cap growth stocks listed in {} with beta between 1.2 and 1.4 and consistent revenue growth",
            count, region
        ),
        "bonds" => format!(
            "{} liquid bond ETFs listed in {} with low expense ratios and investment-grade holdings",
            count, region
        ),
        "disruptive" => format!(
            "{} thematic ETFs or disruptive-innovation equities listed in {} (AI, robotics, semiconductors, clean energy)",
            count, region
        ),
        other => format!(
            "{} instruments listed in {} that fit an investment bucket called '{}'",
            count, region, other
        ),
    };

    format!(
        "List {} for a position of about {:.0} in total.\n\
         Return a JSON array where each element has:\n\
         - \"ticker\": exchange ticker symbol\n\
         - \"name\": company or fund name\n\
         - \"weight\": suggested percent of this position (all weights sum to 100)\n\
         - \"metrics\": object with numeric \"ROE\", \"PE\", \"debt_to_equity\", \"beta\" (null when unknown)",
        criteria, amount
    )
}

#[async_trait]
impl InstrumentDiscovery for PerplexityDiscovery {
    fn name(&self) -> &str {
        "perplexity"
    }

    async fn discover(&self, bucket: &str, amount: f64, region_filter: &str) -> Result<Vec<Instrument>> {
        let bucket = normalize_bucket(bucket);
        let count = self.settings.instruments_for(&bucket);
        let region = if region_filter.trim().is_empty() {
            self.settings.region.as_str()
        } else {
            region_filter
        };

        log::info!(
            "Discovering {} {} instruments in {} via Perplexity ({})",
            count,
            bucket,
            region,
            self.client.model()
        );

        let prompt = build_discovery_prompt(&bucket, count, amount, region);
        let raw = self
            .client
            .chat(Some(SYSTEM_PROMPT), &prompt)
            .await
            .map_err(|e| anyhow!(e))?;

        let mut instruments = parse_instruments(&raw, &bucket)?;
        instruments.truncate(count);
        log::debug!("Perplexity proposed {} instruments for {}", instruments.len(), bucket);
        Ok(instruments)
    }
}
