//! Knowledge repository
//!
//! Every answered query becomes an insight: which model said what, how
//! often it has been reused, and how users rated it. Stored as one JSON
//! file keyed by UUID.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{load_json, save_json, STORE_VERSION};
use crate::think_tank::content_words;
use crate::think_tank::ranking::jaccard;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub model: String,
    pub query: String,
    pub response: String,
    /// Average user rating, 1..=5
    pub feedback_rating: Option<f64>,
    #[serde(default)]
    pub rating_count: u32,
    pub timestamp: DateTime<Utc>,
    pub usage_count: u32,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightMatch {
    pub insight: Insight,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InsightFile {
    version: String,
    insights: BTreeMap<String, Insight>,
}

impl Default for InsightFile {
    fn default() -> Self {
        Self { version: STORE_VERSION.to_string(), insights: BTreeMap::new() }
    }
}

/// SHA-256 over model, query and response
pub fn content_hash(model: &str, query: &str, response: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [model, query, response] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

pub struct KnowledgeRepository {
    path: PathBuf,
    doc: InsightFile,
}

impl KnowledgeRepository {
    /// Load the repository; a missing file starts empty
    pub fn open(path: &Path) -> Result<Self> {
        let doc = load_json(path)?.unwrap_or_default();
        Ok(Self { path: path.to_path_buf(), doc })
    }

    pub fn version(&self) -> &str {
        &self.doc.version
    }

    pub fn len(&self) -> usize {
        self.doc.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.insights.is_empty()
    }

    /// Store an answer; an identical (model, query, response) bumps usage instead
    pub fn add(&mut self, model: &str, query: &str, response: &str) -> String {
        let hash = content_hash(model, query, response);
        if let Some(existing) = self.doc.insights.values_mut().find(|i| i.content_hash == hash) {
            existing.usage_count += 1;
            return existing.id.clone();
        }

        let id = Uuid::new_v4().to_string();
        self.doc.insights.insert(
            id.clone(),
            Insight {
                id: id.clone(),
                model: model.to_string(),
                query: query.to_string(),
                response: response.to_string(),
                feedback_rating: None,
                rating_count: 0,
                timestamp: Utc::now(),
                usage_count: 1,
                content_hash: hash,
            },
        );
        id
    }

    pub fn get(&self, id: &str) -> Option<&Insight> {
        self.doc.insights.get(id)
    }

    pub fn record_usage(&mut self, id: &str) -> Result<u32> {
        let Some(insight) = self.doc.insights.get_mut(id) else {
            bail!("Unknown insight: {}", id);
        };
        insight.usage_count += 1;
        Ok(insight.usage_count)
    }

    /// Fold a 1..=5 rating into the running average; returns the new average
    pub fn rate(&mut self, id: &str, rating: f64) -> Result<f64> {
        if !(1.0..=5.0).contains(&rating) {
            bail!("Rating must be between 1 and 5, got {}", rating);
        }
        let Some(insight) = self.doc.insights.get_mut(id) else {
            bail!("Unknown insight: {}", id);
        };

        let n = insight.rating_count as f64;
        let avg = match insight.feedback_rating {
            Some(prev) if insight.rating_count > 0 => (prev * n + rating) / (n + 1.0),
            _ => rating,
        };
        insight.feedback_rating = Some(avg);
        insight.rating_count += 1;
        Ok(avg)
    }

    /// Insights whose query shares content words with `query`, most similar first
    pub fn find_relevant(&self, query: &str, limit: usize) -> Vec<InsightMatch> {
        let words: HashSet<String> = content_words(query).into_iter().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<InsightMatch> = self
            .doc
            .insights
            .values()
            .filter_map(|insight| {
                let other: HashSet<String> = content_words(&insight.query).into_iter().collect();
                let similarity = jaccard(&words, &other);
                (similarity > 0.0).then(|| InsightMatch { insight: insight.clone(), similarity })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ra = a.insight.feedback_rating.unwrap_or(0.0);
                    let rb = b.insight.feedback_rating.unwrap_or(0.0);
                    rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.insight.usage_count.cmp(&a.insight.usage_count))
        });
        matches.truncate(limit);
        matches
    }

    /// Best-rated insights produced by a model
    pub fn top_for_model(&self, model: &str, limit: usize) -> Vec<&Insight> {
        let mut items: Vec<&Insight> = self.doc.insights.values().filter(|i| i.model == model).collect();
        items.sort_by(|a, b| {
            let ra = a.feedback_rating.unwrap_or(0.0);
            let rb = b.feedback_rating.unwrap_or(0.0);
            rb.partial_cmp(&ra)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.usage_count.cmp(&a.usage_count))
        });
        items.truncate(limit);
        items
    }

    /// Most reused insights
    pub fn most_used(&self, limit: usize) -> Vec<&Insight> {
        let mut items: Vec<&Insight> = self.doc.insights.values().collect();
        items.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then_with(|| b.timestamp.cmp(&a.timestamp)));
        items.truncate(limit);
        items
    }

    pub fn remove(&mut self, id: &str) -> Option<Insight> {
        self.doc.insights.remove(id)
    }

    pub fn save(&self) -> Result<()> {
        save_json(&self.path, &self.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup_repo() -> (KnowledgeRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = KnowledgeRepository::open(&dir.path().join("insights.json")).unwrap();
        (repo, dir)
    }

    #[test]
    fn test_open_missing_is_empty() {
        let (repo, _dir) = setup_repo();
        assert!(repo.is_empty());
        assert_eq!(repo.version(), STORE_VERSION);
    }

    #[test]
    fn test_add_and_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("insights.json");

        let id = {
            let mut repo = KnowledgeRepository::open(&path).unwrap();
            let id = repo.add("gpt-4o", "What is Rust?", "A systems language.");
            repo.save().unwrap();
            id
        };

        let repo = KnowledgeRepository::open(&path).unwrap();
        let insight = repo.get(&id).unwrap();
        assert_eq!(insight.model, "gpt-4o");
        assert_eq!(insight.usage_count, 1);
        assert!(insight.feedback_rating.is_none());
        assert_eq!(insight.content_hash.len(), 64);
    }

    #[test]
    fn test_duplicate_bumps_usage() {
        let (mut repo, _dir) = setup_repo();
        let a = repo.add("m", "q", "r");
        let b = repo.add("m", "q", "r");
        let c = repo.add("m", "q", "different");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.get(&a).unwrap().usage_count, 2);
    }

    #[test]
    fn test_rate_running_average() {
        let (mut repo, _dir) = setup_repo();
        let id = repo.add("m", "q", "r");

        assert_eq!(repo.rate(&id, 5.0).unwrap(), 5.0);
        assert_eq!(repo.rate(&id, 2.0).unwrap(), 3.5);
        assert_eq!(repo.get(&id).unwrap().rating_count, 2);
    }

    #[test]
    fn test_rate_rejects_out_of_range_and_unknown() {
        let (mut repo, _dir) = setup_repo();
        let id = repo.add("m", "q", "r");
        assert!(repo.rate(&id, 0.0).is_err());
        assert!(repo.rate(&id, 5.5).is_err());
        assert!(repo.rate("missing", 3.0).is_err());
        assert!(repo.record_usage("missing").is_err());
    }

    #[test]
    fn test_find_relevant_orders_by_similarity_then_rating() {
        let (mut repo, _dir) = setup_repo();
        let exact = repo.add("a", "rust borrow checker errors", "...");
        let partial_low = repo.add("b", "rust async runtime", "x");
        let partial_high = repo.add("c", "rust macro hygiene", "y");
        repo.add("d", "baking sourdough bread", "z");
        repo.rate(&partial_high, 5.0).unwrap();
        repo.rate(&partial_low, 1.0).unwrap();

        let found = repo.find_relevant("borrow checker errors in rust", 10);
        let ids: Vec<&str> = found.iter().map(|m| m.insight.id.as_str()).collect();

        assert_eq!(ids, vec![exact.as_str(), partial_high.as_str(), partial_low.as_str()]);
        assert!((found[0].similarity - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_find_relevant_limit_and_empty_query() {
        let (mut repo, _dir) = setup_repo();
        repo.add("a", "rust one", "1");
        repo.add("a", "rust two", "2");
        assert_eq!(repo.find_relevant("rust", 1).len(), 1);
        assert!(repo.find_relevant("a an", 10).is_empty());
    }

    #[test]
    fn test_top_for_model() {
        let (mut repo, _dir) = setup_repo();
        let low = repo.add("gpt-4o", "q1", "r1");
        let high = repo.add("gpt-4o", "q2", "r2");
        repo.add("claude-3-opus", "q3", "r3");
        repo.rate(&low, 2.0).unwrap();
        repo.rate(&high, 4.0).unwrap();

        let top = repo.top_for_model("gpt-4o", 5);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].id, high);
    }

    #[test]
    fn test_most_used() {
        let (mut repo, _dir) = setup_repo();
        repo.add("m", "q1", "r1");
        let popular = repo.add("m", "q2", "r2");
        repo.record_usage(&popular).unwrap();

        let top = repo.most_used(1);
        assert_eq!(top[0].id, popular);
    }

    #[test]
    fn test_remove() {
        let (mut repo, _dir) = setup_repo();
        let id = repo.add("m", "q", "r");
        assert!(repo.remove(&id).is_some());
        assert!(repo.get(&id).is_none());
    }
}
