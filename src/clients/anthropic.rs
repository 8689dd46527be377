//! Anthropic Messages API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::traits::{CompletionRequest, LanguageModel, ModelError};
use crate::config::SystemConfig;

const API_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(system: &SystemConfig, api_key: String) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(system.timeout_secs))
            .build()
            .map_err(|e| ModelError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: system.model.clone(),
            endpoint: format!("{}/messages", system.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        debug!(
            stage = request.stage.id(),
            model = %self.model,
            chars = request.prompt.len(),
            "sending completion request"
        );

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response.json().await?;
        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(
                stage = request.stage.id(),
                "model response hit max_tokens; output may be truncated"
            );
        }

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(ModelError::Empty);
        }
        Ok(text)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_url() {
        let system = SystemConfig {
            base_url: "https://example.test/v1/".to_string(),
            ..SystemConfig::default()
        };
        let client = AnthropicClient::new(&system, "sk-test".into()).unwrap();
        assert_eq!(client.endpoint, "https://example.test/v1/messages");
        assert_eq!(client.model_id(), crate::config::DEFAULT_MODEL);
    }

    #[test]
    fn response_text_blocks_decode() {
        let raw = r#"{"content": [{"type": "text", "text": "{\"a\": 1}"}, {"type": "tool_use"}], "stop_reason": "end_turn"}"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert_eq!(parsed.content[0].text.as_deref(), Some("{\"a\": 1}"));
        assert!(parsed.content[1].text.is_none());
    }
}
