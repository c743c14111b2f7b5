//! LLM client for OpenAI-compatible chat completion providers (OpenRouter by default)

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Configuration for an LLM API provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL for the API (e.g., "https://openrouter.ai/api/v1")
    pub base_url: String,
    pub api_key: String,
    /// Extra headers to include in requests (e.g., X-Title, HTTP-Referer)
    pub extra_headers: Vec<(String, String)>,
    /// Whether to include `transforms: []` in requests (OpenRouter-specific)
    pub include_transforms: bool,
}

impl ProviderConfig {
    /// OpenRouter at its default URL
    pub fn openrouter(api_key: String) -> Self {
        Self::with_base_url(api_key, OPENROUTER_BASE_URL.to_string())
    }

    /// Any OpenAI-compatible endpoint; OpenRouter headers are added when the URL is OpenRouter's
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let is_openrouter = base_url.contains("openrouter.ai");
        let extra_headers = if is_openrouter {
            vec![("X-Title".to_string(), "Call Learner".to_string())]
        } else {
            Vec::new()
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            extra_headers,
            include_transforms: is_openrouter,
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transforms: Option<Vec<Value>>,
}

/// LLM API client
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Arc<Client>,
    provider: ProviderConfig,
}

impl OpenRouterClient {
    pub fn new(provider: ProviderConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client: Arc::new(client),
            provider,
        })
    }

    /// Send a chat completion request and return the text content
    pub async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            max_tokens,
            temperature: Some(0.2),
            transforms: if self.provider.include_transforms { Some(vec![]) } else { None },
        };

        let mut req_builder = self
            .client
            .post(format!("{}/chat/completions", self.provider.base_url))
            .header("Authorization", format!("Bearer {}", self.provider.api_key));
        for (key, value) in &self.provider.extra_headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }
        let response = req_builder
            .json(&request)
            .send()
            .await
            .context("Failed to send request to LLM provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM API error ({}): {}", status, crate::truncate_safe(&body, 500));
        }

        let body = response.text().await.context("Failed to read response body")?;
        let raw: Value = serde_json::from_str(&body).map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse JSON response: {} (body: {})",
                e,
                crate::truncate_safe(&body, 500)
            )
        })?;

        Ok(extract_content(&raw))
    }
}

/// Text of the first choice; handles both string and content-part array forms
pub fn extract_content(raw: &Value) -> String {
    let content = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"));

    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_string_content() {
        let raw = json!({ "choices": [{ "message": { "role": "assistant", "content": "hello" } }] });
        assert_eq!(extract_content(&raw), "hello");
    }

    #[test]
    fn test_extract_content_parts() {
        let raw = json!({ "choices": [{ "message": { "content": [
            { "type": "text", "text": "a" },
            { "type": "image_url", "image_url": { "url": "x" } },
            { "type": "text", "text": "b" }
        ] } }] });
        assert_eq!(extract_content(&raw), "ab");
    }

    #[test]
    fn test_extract_missing_content() {
        assert_eq!(extract_content(&json!({ "choices": [] })), "");
    }

    #[test]
    fn test_provider_headers() {
        let openrouter = ProviderConfig::openrouter("k".into());
        assert!(openrouter.include_transforms);
        let local = ProviderConfig::with_base_url("k".into(), "http://localhost:11434/v1/".into());
        assert!(!local.include_transforms);
        assert_eq!(local.base_url, "http://localhost:11434/v1");
    }
}
