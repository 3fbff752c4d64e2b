//! External model providers
//!
//! Each provider turns a list of chat messages into one completion
//! string. A single attempt is made per call; the chat layer decides
//! what to do when a provider fails.

mod anthropic;
mod huggingface;
mod openai;
mod simulated;

pub use anthropic::AnthropicProvider;
pub use huggingface::HuggingFaceProvider;
pub use openai::OpenAiCompatible;
pub use simulated::{SimulatedProvider, SIMULATED_MODEL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ProvidersConfig;
use crate::types::ChatMessage;

/// Default completion budget when a provider has no `max_tokens` configured
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Mistral,
    #[serde(rename = "huggingface")]
    HuggingFace,
    Simulated,
}

impl ProviderKind {
    /// Providers reached over the network
    pub const REMOTE: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Mistral,
        ProviderKind::HuggingFace,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Mistral => "mistral",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Simulated => "simulated",
        }
    }

    /// Environment variables holding the API key, in priority order
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
            ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
            ProviderKind::Mistral => &["MISTRAL_API_KEY"],
            ProviderKind::HuggingFace => &["HUGGINGFACE_API_KEY", "HF_TOKEN"],
            ProviderKind::Simulated => &[],
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Mistral => "https://api.mistral.ai",
            ProviderKind::HuggingFace => "https://api-inference.huggingface.co",
            ProviderKind::Simulated => "",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} API key not configured")]
    MissingApiKey(ProviderKind),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),
}

/// A source of completions
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether calls can be attempted at all (API key present)
    fn is_available(&self) -> bool;

    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, ProviderError>;
}

/// Lookup of the configured providers
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, Arc<dyn ModelProvider>>,
    max_tokens: BTreeMap<ProviderKind, u32>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self { providers: BTreeMap::new(), max_tokens: BTreeMap::new() }
    }

    /// Build every provider from config; ones without keys are registered but unavailable
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let client = reqwest::Client::new();
        let mut registry = Self::empty();

        for kind in ProviderKind::REMOTE {
            let Some(settings) = config.settings(kind) else { continue };
            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string());
            let api_key = settings.api_key.clone().filter(|k| !k.trim().is_empty());

            let provider: Arc<dyn ModelProvider> = match kind {
                ProviderKind::OpenAi | ProviderKind::Mistral => {
                    Arc::new(OpenAiCompatible::new(kind, client.clone(), base_url, api_key))
                }
                ProviderKind::Anthropic => {
                    Arc::new(AnthropicProvider::new(client.clone(), base_url, api_key))
                }
                ProviderKind::HuggingFace => {
                    Arc::new(HuggingFaceProvider::new(client.clone(), base_url, api_key))
                }
                ProviderKind::Simulated => continue,
            };
            registry.max_tokens.insert(kind, settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
            registry.register(provider);
        }

        registry.register(Arc::new(SimulatedProvider));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn max_tokens(&self, kind: ProviderKind) -> u32 {
        self.max_tokens.get(&kind).copied().unwrap_or(DEFAULT_MAX_TOKENS)
    }

    /// Remote providers that can currently be called
    pub fn available_kinds(&self) -> Vec<ProviderKind> {
        self.providers
            .values()
            .filter(|p| p.kind() != ProviderKind::Simulated && p.is_available())
            .map(|p| p.kind())
            .collect()
    }
}

/// Read the body of a non-2xx response into a `Status` error
pub(crate) async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::Status { status, body }
}

/// Flatten a conversation into a single prompt for text-completion APIs
pub(crate) fn flatten_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let label = match message.role {
            crate::types::Role::System => "System",
            crate::types::Role::User => "User",
            crate::types::Role::Assistant => "Assistant",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(message.content.trim());
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    #[test]
    fn test_registry_availability_follows_keys() {
        let config = ProvidersConfig {
            openai: ProviderSettings { api_key: Some("sk-test".into()), ..Default::default() },
            anthropic: ProviderSettings { api_key: Some("  ".into()), ..Default::default() },
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config);

        assert_eq!(registry.available_kinds(), vec![ProviderKind::OpenAi]);
        assert!(registry.get(ProviderKind::Anthropic).is_some());
        assert!(registry.get(ProviderKind::Simulated).is_some());
    }

    #[test]
    fn test_max_tokens_default_and_override() {
        let config = ProvidersConfig {
            mistral: ProviderSettings { max_tokens: Some(256), ..Default::default() },
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config);
        assert_eq!(registry.max_tokens(ProviderKind::Mistral), 256);
        assert_eq!(registry.max_tokens(ProviderKind::OpenAi), DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_flatten_prompt() {
        let prompt = flatten_prompt(&[
            ChatMessage::system("Be brief."),
            ChatMessage::user("Hello"),
        ]);
        assert_eq!(prompt, "System: Be brief.\nUser: Hello\nAssistant:");
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(serde_json::to_string(&ProviderKind::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(serde_json::to_string(&ProviderKind::HuggingFace).unwrap(), "\"huggingface\"");
        assert_eq!(ProviderKind::Mistral.to_string(), "mistral");
    }
}
