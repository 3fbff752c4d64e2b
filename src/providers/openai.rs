//! OpenAI-style chat completions (also spoken by Mistral)

use async_trait::async_trait;
use serde_json::json;

use super::{status_error, ModelProvider, ProviderError, ProviderKind};
use crate::types::ChatMessage;

pub struct OpenAiCompatible {
    kind: ProviderKind,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatible {
    pub fn new(
        kind: ProviderKind,
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
    ) -> Self {
        Self { kind, client, base_url, api_key }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatible {
    fn kind(&self) -> ProviderKind {
        self.kind
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
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingApiKey(self.kind))?;

        let body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let json: serde_json::Value = response.json().await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| {
                ProviderError::MalformedResponse(format!("{} response had no message content", self.kind))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_reads_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":" Paris. "}}]}"#)
            .create_async()
            .await;

        let provider = OpenAiCompatible::new(
            ProviderKind::OpenAi,
            reqwest::Client::new(),
            server.url(),
            Some("sk-test".into()),
        );
        let text = provider
            .complete("gpt-4o", &[ChatMessage::user("Capital of France?")], 64)
            .await
            .unwrap();

        assert_eq!(text, "Paris.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_error_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("invalid key")
            .create_async()
            .await;

        let provider = OpenAiCompatible::new(
            ProviderKind::Mistral,
            reqwest::Client::new(),
            server.url(),
            Some("bad".into()),
        );
        let err = provider.complete("mistral-small", &[ChatMessage::user("hi")], 16).await.unwrap_err();

        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_request() {
        let provider = OpenAiCompatible::new(
            ProviderKind::OpenAi,
            reqwest::Client::new(),
            "http://127.0.0.1:9".into(),
            None,
        );
        assert!(!provider.is_available());
        let err = provider.complete("gpt-4o", &[ChatMessage::user("hi")], 16).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingApiKey(ProviderKind::OpenAi)));
    }

    #[tokio::test]
    async fn test_empty_content_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let provider = OpenAiCompatible::new(
            ProviderKind::OpenAi,
            reqwest::Client::new(),
            server.url(),
            Some("sk-test".into()),
        );
        let err = provider.complete("gpt-4o", &[ChatMessage::user("hi")], 16).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }
}
