//! Anthropic API client
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{ProviderClient, ProviderReply, SYSTEM_PROMPT};
use crate::error::IndexError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for AnthropicClient {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderReply> {
        if self.api_key.is_empty() {
            return Err(IndexError::ProviderError(
                "ANTHROPIC_API_KEY not configured".to_string(),
            ));
        }

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 2048,
            temperature: 0.2,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!(model = %self.model, "Calling Anthropic API");

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Anthropic API request failed: {}", e);
                IndexError::ProviderError(format!("Anthropic API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Anthropic API error response: {}", error_text);
            return Err(IndexError::ProviderError(format!(
                "Anthropic API error: {}",
                error_text
            )));
        }

        let body: MessagesResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Anthropic response: {}", e);
            IndexError::ProviderError(format!("Anthropic parse error: {}", e))
        })?;

        let text = body
            .content
            .iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text.clone())
            .ok_or_else(|| {
                IndexError::ProviderError("Empty response from Anthropic".to_string())
            })?;

        Ok(ProviderReply {
            text,
            prompt_tokens: body.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
            completion_tokens: body.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: i32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: i64,
    output_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_system_prompt() {
        let request = MessagesRequest {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: "packet".to_string(),
            }],
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("packet"));
        assert!(json.contains("max_tokens"));
    }

    #[test]
    fn response_text_block_is_extracted() {
        let raw = r#"{"content":[{"type":"text","text":"{\"ok\":true}"}],"usage":{"input_tokens":10,"output_tokens":5}}"#;
        let body: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.content[0].text.as_deref(), Some("{\"ok\":true}"));
        assert_eq!(body.usage.unwrap().input_tokens, 10);
    }
}
