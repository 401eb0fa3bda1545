//! Anthropic Claude API provider for portfolio narratives

use super::{
    build_narrative_prompt, parse_error, transport_error, with_retries, AiError,
    NarrativeAnalyzer, NarrativeRequest, REQUEST_TIMEOUT_SECS,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const PROVIDER: &str = "Claude";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentBlock<'a> {
    #[serde(rename = "text")]
    Text { text: &'a str },
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContent>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ResponseContent {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct ClaudeNarrator {
    client: reqwest::Client,
    model: String,
    max_tokens: u32,
}

impl ClaudeNarrator {
    pub fn new(api_key: &str, model: &str, max_tokens: u32) -> Result<Self, AiError> {
        if api_key.trim().is_empty() {
            return Err(AiError::invalid_api_key(PROVIDER, model));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| AiError::invalid_api_key(PROVIDER, model))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static("2023-06-01"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Create client with timeout and connection pooling
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| AiError::network_error(PROVIDER, model, &e.to_string()))?;

        Ok(Self {
            client,
            model: model.to_string(),
            max_tokens,
        })
    }

    async fn send_once(&self, request_body: &MessagesRequest<'_>) -> Result<String, AiError> {
        let model = self.model.as_str();
        let response = self
            .client
            .post(API_URL)
            .json(request_body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, model, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(PROVIDER, status.as_u16(), &body, model));
        }

        let data: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AiError::other(PROVIDER, model, &format!("JSON parse error: {}", e)))?;

        if let Some(usage) = &data.usage {
            log::debug!(
                "Claude narrative used {} tokens",
                usage.input_tokens + usage.output_tokens
            );
        }

        Ok(data
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Single-prompt completion with retry logic
    pub async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        let request_body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: vec![ContentBlock::Text { text: prompt }],
            }],
        };

        with_retries(|| self.send_once(&request_body)).await
    }
}

#[async_trait]
impl NarrativeAnalyzer for ClaudeNarrator {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn analyze(&self, request: NarrativeRequest<'_>) -> Result<String, AiError> {
        log::info!(
            "Requesting {} narrative for {} positions from Claude ({})",
            request.language,
            request.lines.len(),
            self.model
        );
        let prompt = build_narrative_prompt(&request);
        let text = self.complete(&prompt).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(AiError::other(PROVIDER, &self.model, "Empty narrative response"));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiErrorKind;

    #[test]
    fn test_request_serialization() {
        let body = MessagesRequest {
            model: "claude-sonnet-4-5-20250514",
            max_tokens: 800,
            messages: vec![Message {
                role: "user",
                content: vec![ContentBlock::Text { text: "hello" }],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 800);
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][0]["text"], "hello");
    }

    #[test]
    fn test_blank_key_rejected() {
        let err = ClaudeNarrator::new(" ", "claude-sonnet-4-5-20250514", 800).err().unwrap();
        assert_eq!(err.kind, AiErrorKind::InvalidApiKey);
    }

    #[tokio::test]
    #[ignore] // Requires API key
    async fn test_complete() {
        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            return;
        }

        let narrator = ClaudeNarrator::new(&api_key, "claude-haiku-4-5-20251015", 64).unwrap();
        let result = narrator.complete("Reply with the word ok.").await;
        assert!(result.is_ok());
    }
}
