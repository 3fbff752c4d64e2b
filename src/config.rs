//! Configuration for Minerva
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables (API keys, host/port, data dir). Every section has defaults
//! so an empty file, or no file at all, is a valid configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::providers::ProviderKind;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinervaConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Where JSON stores and the memory database live
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub think_tank: ThinkTankConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinkTankConfig {
    /// Models consulted per message in think_tank mode
    #[serde(default = "default_max_models")]
    pub max_models: usize,
    /// Per-provider call timeout
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Merge runner-up content into close calls
    #[serde(default = "default_true")]
    pub blend: bool,
    /// Add a Thompson-sampled exploration term to model scores
    #[serde(default)]
    pub explore: bool,
    /// Past messages replayed to the model as context
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for ThinkTankConfig {
    fn default() -> Self {
        Self {
            max_models: default_max_models(),
            request_timeout_secs: default_timeout_secs(),
            blend: true,
            explore: false,
            history_turns: default_history_turns(),
        }
    }
}

fn default_max_models() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_history_turns() -> usize {
    6
}

fn default_true() -> bool {
    true
}

/// Settings for a single provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override the provider's API root (used by tests and proxies)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ProviderSettings {
    pub fn has_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderSettings,
    #[serde(default)]
    pub anthropic: ProviderSettings,
    #[serde(default)]
    pub mistral: ProviderSettings,
    #[serde(default)]
    pub huggingface: ProviderSettings,
}

impl ProvidersConfig {
    pub fn settings(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        match kind {
            ProviderKind::OpenAi => Some(&self.openai),
            ProviderKind::Anthropic => Some(&self.anthropic),
            ProviderKind::Mistral => Some(&self.mistral),
            ProviderKind::HuggingFace => Some(&self.huggingface),
            ProviderKind::Simulated => None,
        }
    }

    fn settings_mut(&mut self, kind: ProviderKind) -> Option<&mut ProviderSettings> {
        match kind {
            ProviderKind::OpenAi => Some(&mut self.openai),
            ProviderKind::Anthropic => Some(&mut self.anthropic),
            ProviderKind::Mistral => Some(&mut self.mistral),
            ProviderKind::HuggingFace => Some(&mut self.huggingface),
            ProviderKind::Simulated => None,
        }
    }
}

impl MinervaConfig {
    /// Load config from `path` (if given) and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config at {:?}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every chat request meaningless
    pub fn validate(&self) -> Result<()> {
        if self.think_tank.max_models == 0 {
            bail!("think_tank.max_models must be at least 1");
        }
        if self.think_tank.request_timeout_secs == 0 {
            bail!("think_tank.request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        for kind in ProviderKind::REMOTE {
            let value = kind.env_vars().iter().find_map(|name| non_empty(name));
            if let (Some(value), Some(settings)) = (value, self.providers.settings_mut(kind)) {
                settings.api_key = Some(value);
            }
        }

        if let Some(host) = non_empty("MINERVA_HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("MINERVA_PORT") {
            match port.trim().parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid MINERVA_PORT={}", port),
            }
        }
        if let Some(dir) = non_empty("MINERVA_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn insights_path(&self) -> PathBuf {
        self.data_dir().join("insights.json")
    }

    pub fn rankings_path(&self) -> PathBuf {
        self.data_dir().join("rankings.json")
    }

    pub fn performance_path(&self) -> PathBuf {
        self.data_dir().join("performance.json")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.data_dir().join("memory.db")
    }
}

fn default_data_dir() -> PathBuf {
    // XDG data dir on Linux, ~/Library/Application Support on macOS
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("minerva")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = MinervaConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.think_tank.max_models, 3);
        assert!(config.think_tank.blend);
        assert!(!config.think_tank.explore);
    }

    #[test]
    fn test_partial_toml() {
        let config = MinervaConfig::from_toml(
            r#"
            data_dir = "/tmp/minerva-test"

            [server]
            port = 8080

            [think_tank]
            max_models = 2

            [providers.openai]
            api_key = "sk-test"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.think_tank.max_models, 2);
        assert_eq!(config.think_tank.request_timeout_secs, 30);
        assert!(config.providers.openai.has_key());
        assert!(!config.providers.anthropic.has_key());
        assert_eq!(config.insights_path(), PathBuf::from("/tmp/minerva-test/insights.json"));
    }

    #[test]
    fn test_zero_models_rejected() {
        let err = MinervaConfig::from_toml("[think_tank]\nmax_models = 0").unwrap_err();
        assert!(err.to_string().contains("max_models"));
        assert!(MinervaConfig::from_toml("[think_tank]\nrequest_timeout_secs = 0").is_err());
        assert!(MinervaConfig::from_toml("[think_tank]\nmax_models = 1").is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(MinervaConfig::from_toml("[server]\nhostname = \"x\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ANTHROPIC_API_KEY", "sk-ant-abc"),
            ("HF_TOKEN", "hf_xyz"),
            ("MINERVA_PORT", "6000"),
            ("MINERVA_DATA_DIR", "/data/minerva"),
            ("OPENAI_API_KEY", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = MinervaConfig::default();
        config.apply_env_with(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.providers.anthropic.api_key.as_deref(), Some("sk-ant-abc"));
        assert_eq!(config.providers.huggingface.api_key.as_deref(), Some("hf_xyz"));
        assert!(config.providers.openai.api_key.is_none());
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.data_dir(), PathBuf::from("/data/minerva"));
    }

    #[test]
    fn test_invalid_port_ignored() {
        let mut config = MinervaConfig::default();
        config.apply_env_with(|name| (name == "MINERVA_PORT").then(|| "nope".to_string()));
        assert_eq!(config.server.port, 5000);
    }
}
