//! HuggingFace Inference API (text generation)

use async_trait::async_trait;
use serde_json::json;

use super::{flatten_prompt, status_error, ModelProvider, ProviderError, ProviderKind};
use crate::types::ChatMessage;

pub struct HuggingFaceProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HuggingFaceProvider {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self { client, base_url, api_key }
    }
}

/// The API answers either `[{"generated_text": ...}]` or `{"generated_text": ...}`
fn extract_generated_text(json: &serde_json::Value) -> Option<String> {
    let text = match json {
        serde_json::Value::Array(items) => items.first()?.get("generated_text")?.as_str()?,
        serde_json::Value::Object(_) => json.get("generated_text")?.as_str()?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl ModelProvider for HuggingFaceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HuggingFace
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
            .ok_or(ProviderError::MissingApiKey(ProviderKind::HuggingFace))?;

        let body = json!({
            "inputs": flatten_prompt(messages),
            "parameters": {
                "max_new_tokens": max_tokens,
                "return_full_text": false,
            },
        });

        let response = self
            .client
            .post(format!("{}/models/{}", self.base_url.trim_end_matches('/'), model))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let json: serde_json::Value = response.json().await?;
        extract_generated_text(&json)
            .ok_or_else(|| ProviderError::MalformedResponse("no generated_text in response".into()))
    }
}
