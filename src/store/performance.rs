//! Model performance analytics and the feedback learning loop
//!
//! Tracks call counts, failures, latency and ranking scores per model.
//! User feedback moves a model's learned confidence asymmetrically:
//! bad answers cost more than good answers earn, so a model has to keep
//! being useful to hold its place. A Beta posterior over
//! positive/negative feedback backs optional Thompson exploration.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::{load_json, save_json, STORE_VERSION};

const POSITIVE_DELTA: f64 = 0.05;
const NEGATIVE_DELTA: f64 = -0.10;
const MIN_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.95;
const NEUTRAL_CONFIDENCE: f64 = 0.5;
/// Scales (confidence - 0.5) into a Think Tank score offset
const OFFSET_SCALE: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStats {
    pub calls: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    /// Times this model's answer led the response
    pub selections: u64,
    pub rank_score_sum: f64,
    pub confidence: f64,
    /// Beta posterior over feedback (α = positive + 1)
    pub alpha: f64,
    /// Beta posterior over feedback (β = negative + 1)
    pub beta: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ModelStats {
    fn default() -> Self {
        Self {
            calls: 0,
            failures: 0,
            total_latency_ms: 0,
            selections: 0,
            rank_score_sum: 0.0,
            confidence: NEUTRAL_CONFIDENCE,
            alpha: 1.0,
            beta: 1.0,
            last_updated: None,
        }
    }
}

impl ModelStats {
    pub fn success_rate(&self) -> Option<f64> {
        (self.calls > 0).then(|| (self.calls - self.failures) as f64 / self.calls as f64)
    }

    /// Mean latency of successful calls
    pub fn avg_latency_ms(&self) -> Option<f64> {
        let ok = self.calls - self.failures;
        (ok > 0).then(|| self.total_latency_ms as f64 / ok as f64)
    }

    pub fn avg_rank_score(&self) -> Option<f64> {
        (self.selections > 0).then(|| self.rank_score_sum / self.selections as f64)
    }

    /// Posterior mean of positive feedback
    pub fn posterior_mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Thompson sample from the feedback posterior
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let u: f64 = rng.gen();
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.inverse_cdf(u),
            Err(_) => self.posterior_mean(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PerformanceFile {
    version: String,
    models: BTreeMap<String, ModelStats>,
}

impl Default for PerformanceFile {
    fn default() -> Self {
        Self { version: STORE_VERSION.to_string(), models: BTreeMap::new() }
    }
}

pub struct PerformanceTracker {
    path: PathBuf,
    doc: PerformanceFile,
}

impl PerformanceTracker {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = load_json(path)?.unwrap_or_default();
        Ok(Self { path: path.to_path_buf(), doc })
    }

    fn entry(&mut self, model: &str) -> &mut ModelStats {
        let stats = self.doc.models.entry(model.to_string()).or_default();
        stats.last_updated = Some(Utc::now());
        stats
    }

    pub fn get(&self, model: &str) -> Option<&ModelStats> {
        self.doc.models.get(model)
    }

    pub fn record_call(&mut self, model: &str, latency_ms: u64, ok: bool) {
        let stats = self.entry(model);
        stats.calls += 1;
        if ok {
            stats.total_latency_ms += latency_ms;
        } else {
            stats.failures += 1;
        }
    }

    pub fn record_selection(&mut self, model: &str, rank_score: f64) {
        let stats = self.entry(model);
        stats.selections += 1;
        stats.rank_score_sum += rank_score;
    }

    /// Apply one piece of user feedback; returns (old, new) confidence
    pub fn apply_feedback(&mut self, model: &str, positive: bool) -> (f64, f64) {
        let stats = self.entry(model);
        let old = stats.confidence;
        let delta = if positive { POSITIVE_DELTA } else { NEGATIVE_DELTA };
        stats.confidence = (old + delta).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
        if positive {
            stats.alpha += 1.0;
        } else {
            stats.beta += 1.0;
        }
        tracing::info!(model, old, new = stats.confidence, positive, "Model confidence adjusted");
        (old, stats.confidence)
    }

    /// Think Tank score offset for a model (0 for unknown models)
    pub fn learned_offset(&self, model: &str) -> f64 {
        self.get(model)
            .map(|s| (s.confidence - NEUTRAL_CONFIDENCE) * OFFSET_SCALE)
            .unwrap_or(0.0)
    }

    pub fn learned_offsets(&self) -> HashMap<String, f64> {
        self.doc
            .models
            .keys()
            .map(|m| (m.clone(), self.learned_offset(m)))
            .collect()
    }

    /// One posterior sample per named model (uniform prior for unseen models)
    pub fn samples<'a>(
        &self,
        models: impl IntoIterator<Item = &'a str>,
        rng: &mut impl Rng,
    ) -> HashMap<String, f64> {
        models
            .into_iter()
            .map(|m| {
                let sample = match self.get(m) {
                    Some(stats) => stats.sample(rng),
                    None => ModelStats::default().sample(rng),
                };
                (m.to_string(), sample)
            })
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ModelStats> {
        self.doc.models.clone()
    }

    pub fn save(&self) -> Result<()> {
        save_json(&self.path, &self.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn setup_tracker() -> (PerformanceTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let tracker = PerformanceTracker::open(&dir.path().join("performance.json")).unwrap();
        (tracker, dir)
    }

    #[test]
    fn test_record_calls() {
        let (mut t, _dir) = setup_tracker();
        t.record_call("gpt-4o", 200, true);
        t.record_call("gpt-4o", 400, true);
        t.record_call("gpt-4o", 9999, false);

        let s = t.get("gpt-4o").unwrap();
        assert_eq!(s.calls, 3);
        assert_eq!(s.failures, 1);
        assert_eq!(s.avg_latency_ms(), Some(300.0));
        assert!((s.success_rate().unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_feedback_is_asymmetric() {
        let (mut t, _dir) = setup_tracker();
        let (old, up) = t.apply_feedback("m", true);
        assert_eq!(old, 0.5);
        assert!((up - 0.55).abs() < 1e-12);

        let (_, down) = t.apply_feedback("m", false);
        assert!((down - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_clamped() {
        let (mut t, _dir) = setup_tracker();
        for _ in 0..20 {
            t.apply_feedback("good", true);
            t.apply_feedback("bad", false);
        }
        assert_eq!(t.get("good").unwrap().confidence, MAX_CONFIDENCE);
        assert_eq!(t.get("bad").unwrap().confidence, MIN_CONFIDENCE);
        assert_eq!(t.get("good").unwrap().alpha, 21.0);
        assert_eq!(t.get("bad").unwrap().beta, 21.0);
    }

    #[test]
    fn test_learned_offset() {
        let (mut t, _dir) = setup_tracker();
        assert_eq!(t.learned_offset("unknown"), 0.0);
        t.apply_feedback("m", false);
        assert!((t.learned_offset("m") - (-0.02)).abs() < 1e-12);
        assert_eq!(t.learned_offsets().len(), 1);
    }

    #[test]
    fn test_samples_in_unit_interval() {
        let (mut t, _dir) = setup_tracker();
        for _ in 0..10 {
            t.apply_feedback("m", true);
        }
        let mut rng = StdRng::seed_from_u64(42);
        let samples = t.samples(["m", "unseen"], &mut rng);
        assert_eq!(samples.len(), 2);
        assert!(samples.values().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_persist_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("performance.json");
        {
            let mut t = PerformanceTracker::open(&path).unwrap();
            t.record_selection("m", 0.8);
            t.record_selection("m", 0.6);
            t.save().unwrap();
        }
        let t = PerformanceTracker::open(&path).unwrap();
        assert!((t.get("m").unwrap().avg_rank_score().unwrap() - 0.7).abs() < 1e-12);
    }
}
