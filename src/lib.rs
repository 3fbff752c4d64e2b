//! Minerva - multi-model chat with a Think Tank
//!
//! A chat server that routes each message to the LLM best suited for it,
//! or to several at once, then ranks and blends what comes back. Every
//! answer and every rating feeds the next selection.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use minerva::{ChatService, ChatRequest, ChatMode, MinervaConfig};
//!
//! let config = MinervaConfig::load(None)?;
//! let chat = ChatService::open(&config)?;
//!
//! let answer = chat.handle(ChatRequest::new("Explain lifetimes").with_mode(ChatMode::Single)).await?;
//! println!("{} ({})", answer.response, answer.model_info.model);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        HTTP / WebSocket (server)   CLI (main)        │
//! └─────────────────────┬───────────────────────────────┘
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │  chat: analyse → select → call → rank → blend        │
//! │  think_tank: capability scores + learned offsets     │
//! │  providers: OpenAI, Anthropic, Mistral, HF, sim      │
//! └─────────────────────┬───────────────────────────────┘
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │  store: insights.json  rankings.json                 │
//! │         performance.json  memory.db                  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod diagnostics;
pub mod providers;
pub mod server;
pub mod store;
pub mod think_tank;
pub mod types;

use tracing_subscriber::EnvFilter;

// Core types
pub use chat::{ChatService, ModelStatus, RequestError, StatsReport};
pub use config::MinervaConfig;
pub use types::*;

// Providers
pub use providers::{ModelProvider, ProviderError, ProviderKind, ProviderRegistry};

// Model selection and ranking
pub use think_tank::{analyze_query, QueryAnalysis, QueryType, ThinkTank};

// Persistence
pub use store::{ConversationMemory, FeedbackStore, KnowledgeRepository, PerformanceTracker};

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "minerva=info";

/// Install the stderr tracing subscriber; safe to call more than once
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
