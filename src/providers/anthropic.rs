//! Anthropic Messages API

use async_trait::async_trait;
use serde_json::json;

use super::{status_error, ModelProvider, ProviderError, ProviderKind};
use crate::types::{ChatMessage, Role};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self { client, base_url, api_key }
    }
}

/// Build the request body; system turns move to the top-level `system` field
fn build_body(model: &str, messages: &[ChatMessage], max_tokens: u32) -> serde_json::Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": turns,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    body
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey(ProviderKind::Anthropic))?;

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&build_body(model, messages, max_tokens))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let json: serde_json::Value = response.json().await?;
        json["content"][0]["text"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| ProviderError::MalformedResponse("anthropic response had no text block".into()))
    }
}
