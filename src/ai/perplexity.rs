//! Perplexity Sonar API client
//!
//! Perplexity's Sonar models combine real-time web search with chat completions.
//! API format is OpenAI-compatible.

use super::{
    parse_error, strip_citations, transport_error, with_retries, AiError, REQUEST_TIMEOUT_SECS,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_URL: &str = "https://api.perplexity.ai/chat/completions";
const PROVIDER: &str = "Perplexity";

/// Maximum tokens for research responses
pub const MAX_TOKENS: u32 = 1500;

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

pub struct PerplexityClient {
    client: reqwest::Client,
    model: String,
}

impl PerplexityClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AiError> {
        if api_key.trim().is_empty() {
            return Err(AiError::invalid_api_key(PROVIDER, model));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(|_| AiError::invalid_api_key(PROVIDER, model))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| AiError::network_error(PROVIDER, model, &e.to_string()))?;

        Ok(Self {
            client,
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, request_body: &ChatCompletionRequest<'_>) -> Result<String, AiError> {
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

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::other(PROVIDER, model, &format!("JSON parse error: {}", e)))?;

        if let Some(usage) = data.usage {
            log::debug!("Perplexity request used {} tokens", usage.total_tokens);
        }

        let raw = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(strip_citations(&raw))
    }

    /// Chat completion with retry logic
    pub async fn chat(&self, system: Option<&str>, user: &str) -> Result<String, AiError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });

        let request_body = ChatCompletionRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: 0.2,
            messages,
        };

        with_retries(|| self.send_once(&request_body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let body = ChatCompletionRequest {
            model: "sonar-pro",
            max_tokens: MAX_TOKENS,
            temperature: 0.2,
            messages: vec![
                ChatMessage { role: "system", content: "Return JSON only." },
                ChatMessage { role: "user", content: "List value stocks" },
            ],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "sonar-pro");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "List value stocks");
    }

    #[test]
    fn test_response_deserialization() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"[]"}}],"usage":{"total_tokens":42}}"#;
        let data: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(data.choices[0].message.content.as_deref(), Some("[]"));
        assert_eq!(data.usage.unwrap().total_tokens, 42);
    }

    #[tokio::test]
    #[ignore] // Requires API key
    async fn test_chat() {
        let api_key = std::env::var("PERPLEXITY_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            return;
        }

        let client = PerplexityClient::new(&api_key, "sonar").unwrap();
        let result = client.chat(None, "Reply with the word ok.").await;
        assert!(result.is_ok());
    }
}
