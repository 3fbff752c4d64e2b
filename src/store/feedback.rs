//! Response rankings
//!
//! User scores of individual answers, per criterion, plus free-text
//! feedback. One JSON file keyed by UUID.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{load_json, save_json, STORE_VERSION};

/// Criteria a ranking may score
pub const CRITERIA: [&str; 4] = ["relevance", "accuracy", "helpfulness", "clarity"];

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ranking {
    pub id: String,
    pub query: String,
    pub response: String,
    #[serde(default)]
    pub model: Option<String>,
    pub scores: BTreeMap<String, u8>,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

impl Ranking {
    /// Mean of the criterion scores
    pub fn overall(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.values().map(|s| *s as f64).sum::<f64>() / self.scores.len() as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RankingFile {
    version: String,
    rankings: BTreeMap<String, Ranking>,
}

impl Default for RankingFile {
    fn default() -> Self {
        Self { version: STORE_VERSION.to_string(), rankings: BTreeMap::new() }
    }
}

/// Check criterion names and score range
pub fn validate_scores(scores: &BTreeMap<String, u8>) -> Result<()> {
    if scores.is_empty() {
        bail!("At least one criterion score is required");
    }
    for (criterion, score) in scores {
        if !CRITERIA.contains(&criterion.as_str()) {
            bail!("Unknown criterion '{}' (expected one of {})", criterion, CRITERIA.join(", "));
        }
        if !(MIN_SCORE..=MAX_SCORE).contains(score) {
            bail!("Score for '{}' must be {}..={}, got {}", criterion, MIN_SCORE, MAX_SCORE, score);
        }
    }
    Ok(())
}

pub struct FeedbackStore {
    path: PathBuf,
    doc: RankingFile,
}

impl FeedbackStore {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = load_json(path)?.unwrap_or_default();
        Ok(Self { path: path.to_path_buf(), doc })
    }

    pub fn version(&self) -> &str {
        &self.doc.version
    }

    pub fn len(&self) -> usize {
        self.doc.rankings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.rankings.is_empty()
    }

    pub fn record(
        &mut self,
        query: &str,
        response: &str,
        model: Option<&str>,
        scores: BTreeMap<String, u8>,
        feedback: &str,
    ) -> Result<String> {
        validate_scores(&scores)?;

        let id = Uuid::new_v4().to_string();
        self.doc.rankings.insert(
            id.clone(),
            Ranking {
                id: id.clone(),
                query: query.to_string(),
                response: response.to_string(),
                model: model.map(String::from),
                scores,
                feedback: feedback.to_string(),
                timestamp: Utc::now(),
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&Ranking> {
        self.doc.rankings.get(id)
    }

    /// Average score per criterion across all rankings that scored it
    pub fn criterion_averages(&self) -> BTreeMap<String, f64> {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for ranking in self.doc.rankings.values() {
            for (criterion, score) in &ranking.scores {
                let entry = sums.entry(criterion.clone()).or_insert((0.0, 0));
                entry.0 += *score as f64;
                entry.1 += 1;
            }
        }
        sums.into_iter().map(|(k, (sum, n))| (k, sum / n as f64)).collect()
    }

    /// Mean overall score of rankings attributed to a model
    pub fn model_average(&self, model: &str) -> Option<f64> {
        let overalls: Vec<f64> = self
            .doc
            .rankings
            .values()
            .filter(|r| r.model.as_deref() == Some(model))
            .map(Ranking::overall)
            .collect();
        if overalls.is_empty() {
            None
        } else {
            Some(overalls.iter().sum::<f64>() / overalls.len() as f64)
        }
    }

    /// Most recent rankings, newest first
    pub fn recent(&self, n: usize) -> Vec<&Ranking> {
        let mut items: Vec<&Ranking> = self.doc.rankings.values().collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items.truncate(n);
        items
    }

    pub fn save(&self) -> Result<()> {
        save_json(&self.path, &self.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scores(pairs: &[(&str, u8)]) -> BTreeMap<String, u8> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn setup_store() -> (FeedbackStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = FeedbackStore::open(&dir.path().join("rankings.json")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rankings.json");

        let id = {
            let mut store = FeedbackStore::open(&path).unwrap();
            let id = store
                .record("q", "r", Some("gpt-4o"), scores(&[("relevance", 8), ("clarity", 6)]), "good")
                .unwrap();
            store.save().unwrap();
            id
        };

        let store = FeedbackStore::open(&path).unwrap();
        let ranking = store.get(&id).unwrap();
        assert_eq!(ranking.overall(), 7.0);
        assert_eq!(ranking.feedback, "good");
        assert_eq!(store.version(), STORE_VERSION);
    }

    #[test]
    fn test_validation() {
        let (mut store, _dir) = setup_store();
        assert!(store.record("q", "r", None, BTreeMap::new(), "").is_err());
        assert!(store.record("q", "r", None, scores(&[("vibes", 5)]), "").is_err());
        assert!(store.record("q", "r", None, scores(&[("accuracy", 0)]), "").is_err());
        assert!(store.record("q", "r", None, scores(&[("accuracy", 11)]), "").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_criterion_averages() {
        let (mut store, _dir) = setup_store();
        store.record("q1", "r", None, scores(&[("relevance", 10), ("accuracy", 4)]), "").unwrap();
        store.record("q2", "r", None, scores(&[("relevance", 6)]), "").unwrap();

        let avgs = store.criterion_averages();
        assert_eq!(avgs["relevance"], 8.0);
        assert_eq!(avgs["accuracy"], 4.0);
        assert!(!avgs.contains_key("clarity"));
    }

    #[test]
    fn test_model_average() {
        let (mut store, _dir) = setup_store();
        store.record("q", "r", Some("a"), scores(&[("relevance", 10)]), "").unwrap();
        store.record("q", "r", Some("a"), scores(&[("relevance", 4)]), "").unwrap();
        store.record("q", "r", Some("b"), scores(&[("relevance", 1)]), "").unwrap();

        assert_eq!(store.model_average("a"), Some(7.0));
        assert_eq!(store.model_average("c"), None);
    }

    #[test]
    fn test_recent_limit() {
        let (mut store, _dir) = setup_store();
        for i in 0..5 {
            store.record(&format!("q{i}"), "r", None, scores(&[("clarity", 5)]), "").unwrap();
        }
        assert_eq!(store.recent(3).len(), 3);
        assert_eq!(store.len(), 5);
    }
}
