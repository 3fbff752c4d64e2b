//! Think Tank - model selection and response ranking
//!
//! Picks which models answer a message by scoring every catalog entry
//! against the analysed query:
//!
//! ```text
//! score = Σ weight[c] * capability[c]          (query-weighted capabilities)
//!       + 0.05 per strength tag the query hits (max 0.15)
//!       + complexity term                      (simple: 0.1*speed, complex: 0.1*reasoning)
//!       + learned offset                       (from user feedback)
//!       + exploration term                     (optional Thompson sample)
//! ```
//!
//! The argmax answers in `single` mode; the top N answer in `think_tank`
//! mode and their outputs are ranked and blended by [`ranking`].

mod analysis;
mod capabilities;
pub mod ranking;

pub use analysis::{analyze_query, content_words, Complexity, QueryAnalysis, QueryType};
pub use capabilities::{default_catalog, Capabilities, ModelProfile};
pub use ranking::{blend, rank_responses, BlendedResponse, Candidate, RankComponents, RankedResponse};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::providers::ProviderKind;

const STRENGTH_BONUS: f64 = 0.05;
const MAX_STRENGTH_BONUS: f64 = 0.15;
const COMPLEXITY_FACTOR: f64 = 0.1;
const EXPLORATION_FACTOR: f64 = 0.1;

/// Feedback-derived score adjustments, keyed by model name
#[derive(Debug, Clone, Default)]
pub struct Adjustments {
    /// Added directly to the score
    pub learned: HashMap<String, f64>,
    /// Posterior samples in [0, 1]; only used when exploration is on
    pub samples: HashMap<String, f64>,
}

/// Contribution of each term to a model's score
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub capability: f64,
    pub strengths: f64,
    pub complexity: f64,
    pub learned: f64,
    pub exploration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelScore {
    pub model: String,
    pub provider: ProviderKind,
    pub api_model: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Score one model against an analysed query
pub fn score_model(profile: &ModelProfile, analysis: &QueryAnalysis, learned: f64) -> ModelScore {
    let capability = analysis.weights.dot(&profile.capabilities);

    let hits = profile.strengths.iter().filter(|s| analysis.tags.contains(s)).count();
    let strengths = (hits as f64 * STRENGTH_BONUS).min(MAX_STRENGTH_BONUS);

    let complexity = match analysis.complexity {
        Complexity::Simple => COMPLEXITY_FACTOR * profile.speed,
        Complexity::Moderate => 0.0,
        Complexity::Complex => COMPLEXITY_FACTOR * profile.capabilities.reasoning,
    };

    let breakdown = ScoreBreakdown { capability, strengths, complexity, learned, exploration: 0.0 };
    ModelScore {
        model: profile.name.clone(),
        provider: profile.provider,
        api_model: profile.api_model.clone(),
        score: capability + strengths + complexity + learned,
        breakdown,
    }
}

/// Model selector over a capability catalog
#[derive(Debug, Clone)]
pub struct ThinkTank {
    catalog: Vec<ModelProfile>,
    explore: bool,
}

impl Default for ThinkTank {
    fn default() -> Self {
        Self::new(default_catalog())
    }
}

impl ThinkTank {
    pub fn new(catalog: Vec<ModelProfile>) -> Self {
        Self { catalog, explore: false }
    }

    pub fn with_exploration(mut self, explore: bool) -> Self {
        self.explore = explore;
        self
    }

    pub fn catalog(&self) -> &[ModelProfile] {
        &self.catalog
    }

    pub fn profile(&self, name: &str) -> Option<&ModelProfile> {
        self.catalog.iter().find(|p| p.name == name)
    }

    /// All models whose provider is available, best first (name breaks ties)
    pub fn rank_models(
        &self,
        analysis: &QueryAnalysis,
        available: &[ProviderKind],
        adjustments: &Adjustments,
    ) -> Vec<ModelScore> {
        let mut scores: Vec<ModelScore> = self
            .catalog
            .iter()
            .filter(|p| available.contains(&p.provider))
            .map(|p| {
                let learned = adjustments.learned.get(&p.name).copied().unwrap_or(0.0);
                let mut scored = score_model(p, analysis, learned);
                if self.explore {
                    if let Some(sample) = adjustments.samples.get(&p.name) {
                        let term = EXPLORATION_FACTOR * (sample - 0.5);
                        scored.breakdown.exploration = term;
                        scored.score += term;
                    }
                }
                scored
            })
            .collect();

        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model.cmp(&b.model))
        });

        tracing::debug!(
            query_type = analysis.query_type.name(),
            ranked = ?scores.iter().map(|s| (&s.model, s.score)).collect::<Vec<_>>(),
            "Think Tank model ranking"
        );
        scores
    }

    /// Top `n` models for a query; `n` of 0 is read as 1
    pub fn select(
        &self,
        analysis: &QueryAnalysis,
        available: &[ProviderKind],
        adjustments: &Adjustments,
        n: usize,
    ) -> Vec<ModelScore> {
        let mut ranked = self.rank_models(analysis, available, adjustments);
        ranked.truncate(n.max(1));
        ranked
    }

    /// The single best model, if any provider is available
    pub fn best(
        &self,
        analysis: &QueryAnalysis,
        available: &[ProviderKind],
        adjustments: &Adjustments,
    ) -> Option<ModelScore> {
        self.rank_models(analysis, available, adjustments).into_iter().next()
    }
}
