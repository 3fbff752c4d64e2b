//! Static model capability table

use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

/// Per-dimension scores in [0, 1]. Also used as query weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub reasoning: f64,
    pub coding: f64,
    pub creativity: f64,
    pub factual: f64,
    pub conversation: f64,
    pub math: f64,
}

impl Capabilities {
    pub fn sum(&self) -> f64 {
        self.reasoning + self.coding + self.creativity + self.factual + self.conversation + self.math
    }

    pub fn dot(&self, other: &Capabilities) -> f64 {
        self.reasoning * other.reasoning
            + self.coding * other.coding
            + self.creativity * other.creativity
            + self.factual * other.factual
            + self.conversation * other.conversation
            + self.math * other.math
    }

    pub fn add_scaled(&self, other: &Capabilities, factor: f64) -> Capabilities {
        Capabilities {
            reasoning: self.reasoning + other.reasoning * factor,
            coding: self.coding + other.coding * factor,
            creativity: self.creativity + other.creativity * factor,
            factual: self.factual + other.factual * factor,
            conversation: self.conversation + other.conversation * factor,
            math: self.math + other.math * factor,
        }
    }

    /// Scale so the components sum to 1 (unchanged when the sum is 0)
    pub fn normalized(&self) -> Capabilities {
        let total = self.sum();
        if total <= 0.0 {
            return *self;
        }
        Capabilities {
            reasoning: self.reasoning / total,
            coding: self.coding / total,
            creativity: self.creativity / total,
            factual: self.factual / total,
            conversation: self.conversation / total,
            math: self.math / total,
        }
    }
}

/// A model the Think Tank can route to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Short name used in scores, stats and insights
    pub name: String,
    pub provider: ProviderKind,
    /// Identifier sent to the provider API
    pub api_model: String,
    pub capabilities: Capabilities,
    /// Relative latency, 1.0 = fastest
    pub speed: f64,
    pub strengths: Vec<String>,
}

fn profile(
    name: &str,
    provider: ProviderKind,
    api_model: &str,
    caps: [f64; 6],
    speed: f64,
    strengths: &[&str],
) -> ModelProfile {
    let [reasoning, coding, creativity, factual, conversation, math] = caps;
    ModelProfile {
        name: name.to_string(),
        provider,
        api_model: api_model.to_string(),
        capabilities: Capabilities { reasoning, coding, creativity, factual, conversation, math },
        speed,
        strengths: strengths.iter().map(|s| s.to_string()).collect(),
    }
}

/// The built-in catalog
///
/// Columns: reasoning, coding, creativity, factual, conversation, math.
pub fn default_catalog() -> Vec<ModelProfile> {
    use ProviderKind::*;
    vec![
        profile("gpt-4o", OpenAi, "gpt-4o", [0.93, 0.92, 0.85, 0.90, 0.88, 0.90], 0.6, &["coding", "math", "reasoning"]),
        profile("gpt-3.5-turbo", OpenAi, "gpt-3.5-turbo", [0.72, 0.74, 0.70, 0.72, 0.82, 0.65], 0.9, &["conversational", "fast"]),
        profile("claude-3-opus", Anthropic, "claude-3-opus-20240229", [0.95, 0.88, 0.92, 0.90, 0.90, 0.86], 0.4, &["reasoning", "creative", "long-form"]),
        profile("claude-3-haiku", Anthropic, "claude-3-haiku-20240307", [0.74, 0.72, 0.74, 0.74, 0.84, 0.66], 0.95, &["conversational", "fast"]),
        profile("mistral-large", Mistral, "mistral-large-latest", [0.86, 0.86, 0.78, 0.84, 0.80, 0.82], 0.6, &["coding", "multilingual"]),
        profile("mistral-small", Mistral, "mistral-small-latest", [0.68, 0.70, 0.66, 0.68, 0.76, 0.60], 0.9, &["fast", "multilingual"]),
        profile("zephyr-7b-beta", HuggingFace, "HuggingFaceH4/zephyr-7b-beta", [0.55, 0.50, 0.62, 0.55, 0.70, 0.45], 0.7, &["conversational"]),
    ]
}
