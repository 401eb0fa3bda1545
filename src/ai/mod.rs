//! LLM providers for research and narrative analysis.
//!
//! Supports Claude (Anthropic) for portfolio narratives and Perplexity (Sonar) for
//! web-grounded instrument discovery.

pub mod claude;
pub mod perplexity;

use crate::allocation::{AllocationLine, PortfolioMetrics};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::future::Future;

// ============================================================================
// Structured AI Errors
// ============================================================================

/// Types of AI API errors
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AiErrorKind {
    /// Rate limit exceeded - too many requests, retry after delay
    RateLimit,
    /// Quota/credits exhausted - need to upgrade plan or switch provider
    QuotaExceeded,
    /// Invalid or expired API key
    InvalidApiKey,
    /// Model not found or not available
    ModelNotFound,
    /// Server error on provider side
    ServerError,
    /// Network/connection error
    NetworkError,
    /// Other/unknown error
    Other,
}

/// Structured AI error with details
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiError {
    pub kind: AiErrorKind,
    pub message: String,
    pub provider: String,
    pub model: String,
    /// Suggested retry delay in seconds (for rate limit errors)
    pub retry_after_secs: Option<u32>,
    /// Suggested fallback model (for quota/model errors)
    pub fallback_model: Option<String>,
}

impl AiError {
    fn new(kind: AiErrorKind, provider: &str, model: &str, message: String) -> Self {
        Self {
            kind,
            message,
            provider: provider.to_string(),
            model: model.to_string(),
            retry_after_secs: None,
            fallback_model: None,
        }
    }

    pub fn rate_limit(provider: &str, model: &str, retry_after: Option<u32>) -> Self {
        Self {
            retry_after_secs: retry_after,
            ..Self::new(AiErrorKind::RateLimit, provider, model, "Too many requests, retry later".into())
        }
    }

    pub fn quota_exceeded(provider: &str, model: &str, fallback: Option<&str>) -> Self {
        Self {
            fallback_model: fallback.map(String::from),
            ..Self::new(AiErrorKind::QuotaExceeded, provider, model, "Quota exhausted".into())
        }
    }

    pub fn invalid_api_key(provider: &str, model: &str) -> Self {
        Self::new(AiErrorKind::InvalidApiKey, provider, model, "Invalid API key".into())
    }

    pub fn model_not_found(provider: &str, model: &str, fallback: Option<&str>) -> Self {
        Self {
            fallback_model: fallback.map(String::from),
            ..Self::new(
                AiErrorKind::ModelNotFound,
                provider,
                model,
                format!("Model '{}' not available", model),
            )
        }
    }

    pub fn server_error(provider: &str, model: &str, details: &str) -> Self {
        Self {
            retry_after_secs: Some(5),
            ..Self::new(
                AiErrorKind::ServerError,
                provider,
                model,
                format!("Server error at {}: {}", provider, details),
            )
        }
    }

    pub fn network_error(provider: &str, model: &str, details: &str) -> Self {
        Self {
            retry_after_secs: Some(3),
            ..Self::new(
                AiErrorKind::NetworkError,
                provider,
                model,
                format!("Network error: {}", details),
            )
        }
    }

    pub fn other(provider: &str, model: &str, message: &str) -> Self {
        Self::new(AiErrorKind::Other, provider, model, message.to_string())
    }

    /// Rate limits, server errors and network errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            AiErrorKind::RateLimit | AiErrorKind::ServerError | AiErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for AiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.provider, self.model, self.message)
    }
}

impl std::error::Error for AiError {}

/// Parse retry delay from error response (supports "4s", "4.5s", seconds as number)
pub fn parse_retry_delay(text: &str) -> Option<u32> {
    for (marker, words) in [("retryDelay", 5), ("retry in", 3), ("retry-after", 3)] {
        if let Some(idx) = text.find(marker) {
            let after = &text[idx + marker.len()..];
            for word in after.split_whitespace().take(words) {
                let clean = word.trim_matches(|c: char| !c.is_numeric() && c != '.');
                if let Ok(secs) = clean.parse::<f64>() {
                    return Some(secs.ceil() as u32);
                }
            }
        }
    }
    None
}

/// Get fallback model for a given provider and model
pub fn get_fallback_model(provider: &str, current_model: &str) -> Option<&'static str> {
    match provider {
        "claude" | "Claude" => {
            // Claude fallback: opus -> sonnet -> haiku
            if current_model.contains("opus") {
                Some("claude-sonnet-4-5-20250514")
            } else if current_model.contains("sonnet") {
                Some("claude-haiku-4-5-20251015")
            } else {
                None
            }
        }
        "perplexity" | "Perplexity" => {
            // Perplexity fallback: reasoning -> pro -> sonar
            if current_model.contains("reasoning") {
                Some("sonar-pro")
            } else if current_model.contains("pro") {
                Some("sonar")
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Shared HTTP status mapping for chat-style APIs
pub fn parse_error(provider: &str, status: u16, body: &str, model: &str) -> AiError {
    let fallback = get_fallback_model(provider, model);
    let body_lower = body.to_lowercase();

    match status {
        429 => {
            if body_lower.contains("quota") || body_lower.contains("credit") || body_lower.contains("billing") {
                AiError::quota_exceeded(provider, model, fallback)
            } else {
                AiError::rate_limit(provider, model, parse_retry_delay(body))
            }
        }
        401 => AiError::invalid_api_key(provider, model),
        403 => {
            if body_lower.contains("permission") || body_lower.contains("access") {
                AiError::invalid_api_key(provider, model)
            } else {
                AiError::other(provider, model, "Access denied")
            }
        }
        404 => AiError::model_not_found(provider, model, fallback),
        500..=599 => AiError::server_error(provider, model, &format!("HTTP {}", status)),
        _ => {
            let snippet: String = body.chars().take(200).collect();
            AiError::other(provider, model, &format!("HTTP {}: {}", status, snippet))
        }
    }
}

// ============================================================================
// Request Configuration Constants
// ============================================================================

/// Request timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Maximum retries for transient errors
pub const MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff (milliseconds)
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Calculate exponential backoff delay
pub fn calculate_backoff_delay(attempt: u32) -> std::time::Duration {
    let delay_ms = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
    std::time::Duration::from_millis(delay_ms.min(10_000)) // Max 10 seconds
}

/// Run `op` with exponential backoff on retryable errors.
pub async fn with_retries<T, F, Fut>(mut op: F) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_RETRIES && err.is_retryable() => {
                let delay = calculate_backoff_delay(attempt);
                log::warn!("{} - retrying in {}ms", err, delay.as_millis());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Map a reqwest transport failure to a network error
pub(crate) fn transport_error(provider: &str, model: &str, e: &reqwest::Error) -> AiError {
    if e.is_timeout() {
        AiError::network_error(provider, model, "request timed out")
    } else if e.is_connect() {
        AiError::network_error(provider, model, "connection failed")
    } else {
        AiError::network_error(provider, model, &e.to_string())
    }
}

static CITATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\d+\]").unwrap());

/// Remove citations like [1], [2] that Perplexity adds
pub fn strip_citations(text: &str) -> String {
    CITATION_RE.replace_all(text, "").trim().to_string()
}

// ============================================================================
// Narrative analysis
// ============================================================================

/// Input for a narrative about a finished allocation
#[derive(Debug, Clone, Copy)]
pub struct NarrativeRequest<'a> {
    pub lines: &'a [AllocationLine],
    pub metrics: Option<&'a PortfolioMetrics>,
    /// ISO language code, e.g. "es", "en"
    pub language: &'a str,
}

/// Produces advisory prose about an allocation. Failures never invalidate the allocation.
#[async_trait]
pub trait NarrativeAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, request: NarrativeRequest<'_>) -> Result<String, AiError>;
}

pub fn language_name(code: &str) -> &str {
    match code.trim().to_lowercase().as_str() {
        "es" => "Spanish",
        "en" => "English",
        "de" => "German",
        "fr" => "French",
        "it" => "Italian",
        "pt" => "Portuguese",
        _ => code,
    }
}

fn format_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
}

/// Build the narrative prompt for an allocation.
pub fn build_narrative_prompt(request: &NarrativeRequest<'_>) -> String {
    let invested: f64 = request.lines.iter().map(|l| l.amount).sum();

    let positions = request
        .lines
        .iter()
        .map(|l| {
            let metrics = if l.metrics.is_empty() {
                "none".to_string()
            } else {
                l.metrics
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, format_metric(*v)))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!(
                "- {} ({}) [{}]: {:.1}% | {:.2} | {} shares @ {:.2} ({}) | metrics: {}",
                l.ticker,
                l.name.as_deref().unwrap_or("-"),
                l.bucket,
                l.weight * 100.0,
                l.amount,
                l.shares,
                l.price,
                l.price_source_label(),
                metrics
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let summary = request.metrics.map_or_else(String::new, |m| {
        format!(
            "\nExpected annual return: {:.1}% | Volatility: {:.1}% | Sharpe ratio: {:.2}\n",
            m.expected_return * 100.0,
            m.volatility * 100.0,
            m.sharpe_ratio
        )
    });

    format!(
        r#"You are a value investor in the tradition of Warren Buffett and Benjamin Graham.
Review the following portfolio ({} positions, {:.2} invested).

{}
{}
Respond in {} using markdown with these sections:
## Justification
[Why each position fits its bucket]
## Risks
[Main risks of the portfolio]
## Opportunities
[Where the upside comes from]
## Diversification
[Assessment of bucket and sector balance]

Be concise. Start directly with the first heading."#,
        request.lines.len(),
        invested,
        positions,
        summary,
        language_name(request.language)
    )
}
