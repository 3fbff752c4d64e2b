//! Chat dispatch
//!
//! Turns a `ChatRequest` into a `ChatResponse`:
//!
//! 1. Analyse the message and load session history
//! 2. Pick models (argmax for `single`, top N for `think_tank`)
//! 3. Call them concurrently, one attempt each, with a timeout
//! 4. Rank the answers and blend close calls
//! 5. Remember the exchange (memory, insights, performance)
//!
//! If nothing answers, the user still gets the canned fallback text.
//! Store access (JSON rewrites, SQLite) runs on the blocking pool.

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{MinervaConfig, ThinkTankConfig};
use crate::providers::{
    ProviderError, ProviderKind, ProviderRegistry, SimulatedProvider, SIMULATED_MODEL,
};
use crate::store::feedback::validate_scores;
use crate::store::{
    ConversationMemory, FeedbackStore, InsightMatch, KnowledgeRepository, ModelStats,
    PerformanceTracker,
};
use crate::think_tank::{
    analyze_query, blend, rank_responses, score_model, Adjustments, Candidate, ModelScore,
    QueryAnalysis, ThinkTank,
};
use crate::types::*;

pub const FALLBACK_RESPONSE: &str = "I apologize, but I'm having trouble reaching my reasoning \
     models right now. Please try again in a moment.";
pub const FALLBACK_MODEL: &str = "fallback";

const SYSTEM_PROMPT: &str = "You are Minerva, a knowledgeable and helpful assistant. \
     Answer clearly and concisely.";

/// Ratings at or above this overall score (1..=10) count as positive feedback
const POSITIVE_FEEDBACK_THRESHOLD: f64 = 6.0;

/// Caller mistakes, as opposed to internal failures
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("unknown insight: {0}")]
    UnknownInsight(String),

    #[error("{0}")]
    Invalid(String),
}

/// Availability and standing of one catalog model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model: String,
    pub provider: ProviderKind,
    pub available: bool,
    pub confidence: f64,
    /// Selection score for the query, when one was given
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub insights: usize,
    pub rankings: usize,
    pub messages: i64,
    pub sessions: usize,
    pub available_providers: Vec<ProviderKind>,
    pub criterion_averages: BTreeMap<String, f64>,
    pub models: BTreeMap<String, ModelStats>,
}

/// The answer before it is wrapped into a response
struct Answer {
    text: String,
    model: String,
    provider: String,
    consulted: Vec<String>,
    scores: Vec<(String, f64)>,
    blended: bool,
    simulated: bool,
    /// The primary model's own words and rank score, when a real model answered
    own: Option<(String, f64)>,
}

/// Assistant turns that no model actually wrote; never replayed as context
fn is_canned(model: Option<&str>) -> bool {
    matches!(model, Some(FALLBACK_MODEL) | Some(SIMULATED_MODEL))
}

/// Shared handles to every store, cheap to move into a blocking task
#[derive(Clone)]
struct Stores {
    insights: Arc<Mutex<KnowledgeRepository>>,
    rankings: Arc<Mutex<FeedbackStore>>,
    performance: Arc<Mutex<PerformanceTracker>>,
    memory: Arc<Mutex<ConversationMemory>>,
}

impl Stores {
    fn open(config: &MinervaConfig) -> Result<Self> {
        Ok(Self {
            insights: Arc::new(Mutex::new(KnowledgeRepository::open(&config.insights_path())?)),
            rankings: Arc::new(Mutex::new(FeedbackStore::open(&config.rankings_path())?)),
            performance: Arc::new(Mutex::new(PerformanceTracker::open(&config.performance_path())?)),
            memory: Arc::new(Mutex::new(ConversationMemory::open(&config.memory_path())?)),
        })
    }

    fn history(&self, session_id: &str, turns: usize) -> Result<Vec<ChatMessage>> {
        let memory = lock(&self.memory)?;
        Ok(memory
            .recent(session_id, turns)?
            .iter()
            .filter(|m| !(m.role == Role::Assistant && is_canned(m.model.as_deref())))
            .map(|m| m.to_chat_message())
            .collect())
    }

    fn remember(&self, exchange: &Exchange) -> Result<Option<String>> {
        {
            let memory = lock(&self.memory)?;
            memory.append(&exchange.session_id, Role::User, &exchange.message, None)?;
            memory.append(&exchange.session_id, Role::Assistant, &exchange.reply, Some(&exchange.model))?;
        }

        let Some((own_text, rank_score)) = &exchange.own else {
            return Ok(None);
        };

        let id = {
            let mut insights = lock(&self.insights)?;
            let id = insights.add(&exchange.model, &exchange.message, own_text);
            insights.save()?;
            id
        };
        {
            let mut performance = lock(&self.performance)?;
            performance.record_selection(&exchange.model, *rank_score);
            performance.save()?;
        }
        Ok(Some(id))
    }
}

/// One turn as it is written to the stores
struct Exchange {
    session_id: String,
    message: String,
    reply: String,
    model: String,
    own: Option<(String, f64)>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("store lock poisoned"))
}

pub struct ChatService {
    settings: ThinkTankConfig,
    registry: ProviderRegistry,
    think_tank: ThinkTank,
    stores: Stores,
}

impl ChatService {
    /// Open all stores under the configured data dir, with providers from config
    pub fn open(config: &MinervaConfig) -> Result<Self> {
        Self::with_registry(config, ProviderRegistry::from_config(&config.providers))
    }

    pub fn with_registry(config: &MinervaConfig, registry: ProviderRegistry) -> Result<Self> {
        config.validate()?;
        let service = Self {
            settings: config.think_tank.clone(),
            registry,
            think_tank: ThinkTank::default().with_exploration(config.think_tank.explore),
            stores: Stores::open(config)?,
        };
        tracing::info!(
            data_dir = ?config.data_dir(),
            providers = ?service.registry.available_kinds(),
            "Chat service ready"
        );
        Ok(service)
    }

    pub fn think_tank(&self) -> &ThinkTank {
        &self.think_tank
    }

    /// Remote providers with credentials
    pub fn available_providers(&self) -> Vec<ProviderKind> {
        self.registry.available_kinds()
    }

    /// Run store work on the blocking pool
    async fn with_stores<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Stores) -> Result<T> + Send + 'static,
    {
        let stores = self.stores.clone();
        tokio::task::spawn_blocking(move || f(&stores))
            .await
            .context("store task panicked")?
    }

    /// Answer one chat message
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = Instant::now();
        let message = request.message.trim().to_string();
        if message.is_empty() {
            return Err(RequestError::EmptyMessage.into());
        }

        let mode = request.mode.unwrap_or_default();
        let session_id = request
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let analysis = analyze_query(&message);

        let turns = self.settings.history_turns;
        let sid = session_id.clone();
        let history = self.with_stores(move |s| s.history(&sid, turns)).await?;

        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        messages.extend(history);
        messages.push(ChatMessage::user(message.clone()));

        let available = self.registry.available_kinds();
        let answer = if mode == ChatMode::Simulated || available.is_empty() {
            if mode != ChatMode::Simulated {
                tracing::warn!("No providers configured, answering in simulated mode");
            }
            simulated_answer(&message)
        } else {
            let n = match mode {
                ChatMode::Single => 1,
                _ => self.settings.max_models,
            };
            let adjustments = self.adjustments()?;
            let selected = self.think_tank.select(&analysis, &available, &adjustments, n);
            self.consult(&analysis, &selected, &messages, mode).await?
        };

        let insight_id = self.remember(&session_id, &message, &answer).await;

        Ok(ChatResponse {
            response: answer.text,
            model_info: ModelInfo {
                model: answer.model,
                provider: answer.provider,
                mode,
                query_type: analysis.query_type.name().to_string(),
                models_consulted: answer.consulted,
                scores: answer.scores,
                blended: answer.blended,
                simulated: answer.simulated,
            },
            time: start.elapsed().as_secs_f64(),
            session_id,
            insight_id,
        })
    }

    fn adjustments(&self) -> Result<Adjustments> {
        let performance = lock(&self.stores.performance)?;
        let samples = if self.settings.explore {
            let names = self.think_tank.catalog().iter().map(|p| p.name.as_str());
            performance.samples(names, &mut rand::thread_rng())
        } else {
            Default::default()
        };
        Ok(Adjustments { learned: performance.learned_offsets(), samples })
    }

    /// Call the selected models and reduce their answers to one
    async fn consult(
        &self,
        analysis: &QueryAnalysis,
        selected: &[ModelScore],
        messages: &[ChatMessage],
        mode: ChatMode,
    ) -> Result<Answer> {
        let timeout_secs = self.settings.request_timeout_secs;
        let calls = selected.iter().map(|choice| async move {
            let started = Instant::now();
            let result = match self.registry.get(choice.provider) {
                Some(provider) => {
                    let max_tokens = self.registry.max_tokens(choice.provider);
                    let call = provider.complete(&choice.api_model, messages, max_tokens);
                    match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(timeout_secs)),
                    }
                }
                None => Err(ProviderError::MissingApiKey(choice.provider)),
            };
            (choice, result, started.elapsed().as_millis() as u64)
        });
        let results = join_all(calls).await;

        let mut candidates = Vec::new();
        let mut outcomes = Vec::new();
        for (choice, result, latency_ms) in results {
            outcomes.push((choice.model.clone(), latency_ms, result.is_ok()));
            match result {
                Ok(text) => candidates.push(Candidate {
                    model: choice.model.clone(),
                    provider: choice.provider,
                    text,
                    prior: choice.score,
                }),
                Err(e) => tracing::warn!(model = %choice.model, error = %e, "Provider call failed"),
            }
        }
        let saved = self
            .with_stores(move |s| {
                let mut performance = lock(&s.performance)?;
                for (model, latency_ms, ok) in &outcomes {
                    performance.record_call(model, *latency_ms, *ok);
                }
                performance.save()
            })
            .await;
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Failed to save performance stats");
        }

        let consulted: Vec<String> = selected.iter().map(|s| s.model.clone()).collect();
        let scores: Vec<(String, f64)> = selected.iter().map(|s| (s.model.clone(), s.score)).collect();

        let ranked = rank_responses(analysis, candidates);
        let blend_enabled = mode == ChatMode::ThinkTank && self.settings.blend;
        let Some(best) = blend(&ranked, blend_enabled) else {
            tracing::error!(models = ?consulted, "Every provider failed, sending fallback");
            return Ok(Answer {
                text: FALLBACK_RESPONSE.to_string(),
                model: FALLBACK_MODEL.to_string(),
                provider: "none".to_string(),
                consulted,
                scores,
                blended: false,
                simulated: false,
                own: None,
            });
        };

        tracing::info!(
            model = %best.primary_model,
            score = best.score,
            blended = best.blended,
            contributors = ?best.contributors,
            "Think Tank answer chosen"
        );
        let own_text = ranked
            .iter()
            .find(|r| r.model == best.primary_model)
            .map(|r| r.text.trim().to_string())
            .unwrap_or_else(|| best.text.clone());
        Ok(Answer {
            own: Some((own_text, best.score)),
            text: best.text,
            model: best.primary_model,
            provider: best.primary_provider.to_string(),
            consulted,
            scores,
            blended: best.blended,
            simulated: false,
        })
    }

    /// Persist the exchange; storage trouble is logged, never surfaced to the user
    async fn remember(&self, session_id: &str, message: &str, answer: &Answer) -> Option<String> {
        let exchange = Exchange {
            session_id: session_id.to_string(),
            message: message.to_string(),
            reply: answer.text.clone(),
            model: answer.model.clone(),
            own: answer.own.clone(),
        };
        match self.with_stores(move |s| s.remember(&exchange)).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist chat exchange");
                None
            }
        }
    }

    /// Record a user rating of a response
    pub async fn feedback(&self, request: FeedbackRequest) -> Result<FeedbackAck> {
        validate_scores(&request.scores).map_err(|e| RequestError::Invalid(e.to_string()))?;
        let known_models: Vec<String> = self.think_tank.catalog().iter().map(|p| p.name.clone()).collect();

        self.with_stores(move |s| {
            let insight_model = match &request.insight_id {
                Some(id) => {
                    let insights = lock(&s.insights)?;
                    let insight = insights
                        .get(id)
                        .ok_or_else(|| RequestError::UnknownInsight(id.clone()))?;
                    Some(insight.model.clone())
                }
                None => None,
            };
            let model = request.model.clone().or(insight_model);

            let (ranking_id, overall) = {
                let mut rankings = lock(&s.rankings)?;
                let id = rankings.record(
                    &request.query,
                    &request.response,
                    model.as_deref(),
                    request.scores.clone(),
                    &request.feedback,
                )?;
                let overall = rankings.get(&id).map(|r| r.overall()).unwrap_or(0.0);
                rankings.save()?;
                (id, overall)
            };

            if let Some(id) = &request.insight_id {
                let mut insights = lock(&s.insights)?;
                insights.rate(id, ten_to_five(overall))?;
                insights.save()?;
            }

            let confidence_change = match model.as_deref() {
                Some(m) if known_models.iter().any(|k| k == m) => {
                    let mut performance = lock(&s.performance)?;
                    let change = performance.apply_feedback(m, overall >= POSITIVE_FEEDBACK_THRESHOLD);
                    performance.save()?;
                    Some(change)
                }
                _ => None,
            };

            Ok(FeedbackAck { ranking_id, overall, confidence_change })
        })
        .await
    }

    /// Catalog with availability, learned confidence and optional query scores
    pub fn models(&self, query: Option<&str>) -> Result<Vec<ModelStatus>> {
        let available = self.registry.available_kinds();
        let analysis = query.filter(|q| !q.trim().is_empty()).map(analyze_query);
        let performance = lock(&self.stores.performance)?;

        let mut statuses: Vec<ModelStatus> = self
            .think_tank
            .catalog()
            .iter()
            .map(|profile| {
                let learned = performance.learned_offset(&profile.name);
                ModelStatus {
                    model: profile.name.clone(),
                    provider: profile.provider,
                    available: available.contains(&profile.provider),
                    confidence: performance
                        .get(&profile.name)
                        .map(|s| s.confidence)
                        .unwrap_or(0.5),
                    score: analysis.as_ref().map(|a| score_model(profile, a, learned).score),
                }
            })
            .collect();

        if analysis.is_some() {
            statuses.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.model.cmp(&b.model))
            });
        }
        Ok(statuses)
    }

    pub async fn stats(&self) -> Result<StatsReport> {
        let available_providers = self.registry.available_kinds();
        self.with_stores(move |s| {
            let insights = lock(&s.insights)?.len();
            let (rankings, criterion_averages) = {
                let store = lock(&s.rankings)?;
                (store.len(), store.criterion_averages())
            };
            let (messages, sessions) = {
                let memory = lock(&s.memory)?;
                (memory.message_count()?, memory.sessions()?.len())
            };
            let models = lock(&s.performance)?.snapshot();

            Ok(StatsReport {
                insights,
                rankings,
                messages,
                sessions,
                available_providers,
                criterion_averages,
                models,
            })
        })
        .await
    }

    /// Insights relevant to `query`, or the most used ones when no query is given
    pub fn insights(&self, query: Option<&str>, limit: usize) -> Result<Vec<InsightMatch>> {
        let insights = lock(&self.stores.insights)?;
        Ok(match query.filter(|q| !q.trim().is_empty()) {
            Some(q) => insights.find_relevant(q, limit),
            None => insights
                .most_used(limit)
                .into_iter()
                .map(|i| InsightMatch { insight: i.clone(), similarity: 0.0 })
                .collect(),
        })
    }

    /// Rate an insight directly on the 1..=5 scale
    pub async fn rate_insight(&self, id: &str, rating: f64) -> Result<f64> {
        let id = id.to_string();
        self.with_stores(move |s| {
            let mut insights = lock(&s.insights)?;
            if insights.get(&id).is_none() {
                return Err(RequestError::UnknownInsight(id).into());
            }
            let avg = insights
                .rate(&id, rating)
                .map_err(|e| RequestError::Invalid(e.to_string()))?;
            insights.save()?;
            Ok(avg)
        })
        .await
    }

    pub async fn clear_session(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        self.with_stores(move |s| lock(&s.memory)?.clear(&session_id)).await
    }
}

fn simulated_answer(message: &str) -> Answer {
    Answer {
        text: SimulatedProvider::respond(message),
        model: SIMULATED_MODEL.to_string(),
        provider: ProviderKind::Simulated.to_string(),
        consulted: vec![SIMULATED_MODEL.to_string()],
        scores: Vec::new(),
        blended: false,
        simulated: true,
        own: None,
    }
}

/// Map an overall 1..=10 score onto the 1..=5 insight scale
fn ten_to_five(overall: f64) -> f64 {
    (1.0 + (overall - 1.0) * 4.0 / 9.0).clamp(1.0, 5.0)
}
