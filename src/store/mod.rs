//! Persistence
//!
//! Insights, rankings and performance stats are each a single JSON
//! document rewritten in full on save (last writer wins). Conversation
//! memory lives in SQLite.

pub mod feedback;
pub mod insights;
pub mod memory;
pub mod performance;

pub use feedback::{FeedbackStore, Ranking, CRITERIA};
pub use insights::{Insight, InsightMatch, KnowledgeRepository};
pub use memory::{ConversationMemory, SessionSummary, StoredMessage};
pub use performance::{ModelStats, PerformanceTracker};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

/// Version string written into every JSON store
pub const STORE_VERSION: &str = "1.0";

/// Read a JSON document, or `None` if the file does not exist
pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let doc = serde_json::from_str(&raw).with_context(|| format!("Corrupt JSON store at {:?}", path))?;
    Ok(Some(doc))
}

/// Write a JSON document via a temp file and rename
pub(crate) fn save_json<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(doc)?)
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}
