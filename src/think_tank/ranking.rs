//! Response ranking and blending
//!
//! Every candidate answer gets a heuristic quality score:
//!
//! | component    | weight | signal                                         |
//! |--------------|--------|------------------------------------------------|
//! | relevance    | 0.35   | share of query content words in the answer     |
//! | completeness | 0.20   | word count against the complexity band         |
//! | structure    | 0.15   | paragraphs, lists, code fences for code asks   |
//! | confidence   | 0.15   | penalised per hedge/apology phrase             |
//! | prior        | 0.15   | the model's Think Tank selection score         |

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::analysis::{content_words, Complexity, QueryAnalysis, QueryType};
use crate::providers::ProviderKind;

const W_RELEVANCE: f64 = 0.35;
const W_COMPLETENESS: f64 = 0.20;
const W_STRUCTURE: f64 = 0.15;
const W_CONFIDENCE: f64 = 0.15;
const W_PRIOR: f64 = 0.15;

/// Lead over the runner-up at which the best answer stands alone
pub const BLEND_MARGIN: f64 = 0.15;
const MAX_BLENDED_SENTENCES: usize = 3;
const MAX_SENTENCE_OVERLAP: f64 = 0.5;
const MIN_SENTENCE_WORDS: usize = 4;

const HEDGES: &[&str] = &[
    "i'm not sure",
    "i am not sure",
    "i apologize",
    "as an ai",
    "i cannot",
    "i can't",
    "i don't know",
    "unable to",
];

/// A raw provider answer waiting to be ranked
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: String,
    pub provider: ProviderKind,
    pub text: String,
    /// Selection score of the model that produced it
    pub prior: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankComponents {
    pub relevance: f64,
    pub completeness: f64,
    pub structure: f64,
    pub confidence: f64,
    pub prior: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResponse {
    pub model: String,
    pub provider: ProviderKind,
    pub text: String,
    pub score: f64,
    pub components: RankComponents,
}

/// Score and sort candidates, best first
pub fn rank_responses(analysis: &QueryAnalysis, candidates: Vec<Candidate>) -> Vec<RankedResponse> {
    let mut ranked: Vec<RankedResponse> = candidates
        .into_iter()
        .map(|c| {
            let components = score_components(analysis, &c);
            let score = if c.text.trim().is_empty() {
                0.0
            } else {
                W_RELEVANCE * components.relevance
                    + W_COMPLETENESS * components.completeness
                    + W_STRUCTURE * components.structure
                    + W_CONFIDENCE * components.confidence
                    + W_PRIOR * components.prior
            };
            RankedResponse { model: c.model, provider: c.provider, text: c.text, score, components }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.model.cmp(&b.model))
    });
    ranked
}

fn score_components(analysis: &QueryAnalysis, candidate: &Candidate) -> RankComponents {
    let text = candidate.text.trim();
    if text.is_empty() {
        return RankComponents::default();
    }
    let lower = text.to_lowercase();

    RankComponents {
        relevance: relevance(&analysis.keywords, text),
        completeness: completeness(analysis.complexity, text.split_whitespace().count()),
        structure: structure(analysis.query_type, text),
        confidence: (1.0 - 0.25 * HEDGES.iter().filter(|h| lower.contains(*h)).count() as f64).max(0.0),
        prior: candidate.prior.clamp(0.0, 1.0),
    }
}

fn relevance(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() {
        return 0.5;
    }
    let words: HashSet<String> = content_words(text).into_iter().collect();
    let hits = keywords.iter().filter(|k| words.contains(*k)).count();
    hits as f64 / keywords.len() as f64
}

fn completeness(complexity: Complexity, word_count: usize) -> f64 {
    let (min, max) = match complexity {
        Complexity::Simple => (5, 150),
        Complexity::Moderate => (30, 400),
        Complexity::Complex => (120, 1200),
    };
    if word_count == 0 {
        0.0
    } else if word_count < min {
        word_count as f64 / min as f64
    } else if word_count > max {
        max as f64 / word_count as f64
    } else {
        1.0
    }
}

fn structure(query_type: QueryType, text: &str) -> f64 {
    let mut score: f64 = 0.5;
    if text.contains("\n\n") {
        score += 0.2;
    }
    let has_list = text.lines().map(str::trim_start).any(|l| {
        l.starts_with("- ")
            || l.starts_with("* ")
            || l.split_once(". ").is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    });
    if has_list {
        score += 0.2;
    }
    if query_type == QueryType::Coding {
        score += if text.contains("```") { 0.3 } else { -0.2 };
    }
    score.clamp(0.0, 1.0)
}

/// The answer sent back to the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendedResponse {
    pub text: String,
    pub primary_model: String,
    pub primary_provider: ProviderKind,
    pub score: f64,
    /// Models whose text appears in the answer, primary first
    pub contributors: Vec<String>,
    pub blended: bool,
}

/// Combine ranked answers
///
/// The best answer stands alone when blending is off, when it is the
/// only one, or when it leads the runner-up by at least [`BLEND_MARGIN`].
/// Otherwise up to three runner-up sentences that say something new are
/// appended. Returns `None` when no candidate has any text.
pub fn blend(ranked: &[RankedResponse], enabled: bool) -> Option<BlendedResponse> {
    let best = ranked.iter().find(|r| !r.text.trim().is_empty())?;
    let alone = BlendedResponse {
        text: best.text.trim().to_string(),
        primary_model: best.model.clone(),
        primary_provider: best.provider,
        score: best.score,
        contributors: vec![best.model.clone()],
        blended: false,
    };

    let runner_up = ranked
        .iter()
        .filter(|r| r.model != best.model && !r.text.trim().is_empty())
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

    let Some(runner_up) = runner_up else { return Some(alone) };
    if !enabled || best.score - runner_up.score >= BLEND_MARGIN {
        return Some(alone);
    }

    let best_sentences: Vec<HashSet<String>> =
        split_sentences(&best.text).iter().map(|s| word_set(s)).collect();

    let novel: Vec<String> = split_sentences(&runner_up.text)
        .into_iter()
        .filter(|s| s.split_whitespace().count() >= MIN_SENTENCE_WORDS)
        .filter(|s| {
            let words = word_set(s);
            best_sentences.iter().all(|b| jaccard(&words, b) < MAX_SENTENCE_OVERLAP)
        })
        .take(MAX_BLENDED_SENTENCES)
        .collect();

    if novel.is_empty() {
        return Some(alone);
    }

    Some(BlendedResponse {
        text: format!(
            "{}\n\nAdditional perspective ({}):\n{}",
            alone.text,
            runner_up.model,
            novel.join(" ")
        ),
        contributors: vec![best.model.clone(), runner_up.model.clone()],
        blended: true,
        ..alone
    })
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

pub(crate) fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::think_tank::analyze_query;

    fn candidate(model: &str, text: &str, prior: f64) -> Candidate {
        Candidate { model: model.into(), provider: ProviderKind::OpenAi, text: text.into(), prior }
    }

    fn ranked(model: &str, text: &str, score: f64) -> RankedResponse {
        RankedResponse {
            model: model.into(),
            provider: ProviderKind::OpenAi,
            text: text.into(),
            score,
            components: RankComponents::default(),
        }
    }

    #[test]
    fn test_relevant_answer_outranks_apology() {
        let analysis = analyze_query("What is the capital of France?");
        let out = rank_responses(
            &analysis,
            vec![
                candidate("a", "I apologize, but I cannot help with that.", 0.9),
                candidate("b", "The capital of France is Paris, on the Seine.", 0.8),
            ],
        );
        assert_eq!(out[0].model, "b");
        assert!(out[1].components.confidence < 1.0);
    }

    #[test]
    fn test_empty_answer_scores_zero() {
        let analysis = analyze_query("hello");
        let out = rank_responses(&analysis, vec![candidate("a", "   ", 0.9), candidate("b", "Hi!", 0.1)]);
        assert_eq!(out[0].model, "b");
        assert_eq!(out[1].score, 0.0);
    }

    #[test]
    fn test_code_fence_rewarded_for_coding_queries() {
        let analysis = analyze_query("Write a python function that reverses a string");
        let with = structure(analysis.query_type, "Here:\n```python\ndef f(s): return s[::-1]\n```");
        let without = structure(analysis.query_type, "Use slicing with a negative step.");
        assert!(with > without);
    }

    #[test]
    fn test_completeness_bands() {
        assert_eq!(completeness(Complexity::Simple, 20), 1.0);
        assert_eq!(completeness(Complexity::Complex, 60), 0.5);
        assert_eq!(completeness(Complexity::Simple, 300), 0.5);
        assert_eq!(completeness(Complexity::Moderate, 0), 0.0);
    }

    #[test]
    fn test_numbered_list_detected() {
        assert!(structure(QueryType::Factual, "Steps:\n1. one\n2. two") > structure(QueryType::Factual, "Steps: one two"));
    }

    #[test]
    fn test_blend_clear_winner_stands_alone() {
        let out = blend(&[ranked("a", "Answer A is long.", 0.9), ranked("b", "Something else entirely here.", 0.5)], true)
            .unwrap();
        assert!(!out.blended);
        assert_eq!(out.text, "Answer A is long.");
        assert_eq!(out.contributors, vec!["a".to_string()]);
    }

    #[test]
    fn test_blend_close_call_appends_novel_sentences() {
        let best = "Use a connection pool. It reduces latency for repeated queries.";
        let other = "Use a connection pool. Also add an index on the lookup column for speed. Monitor slow queries weekly with the profiler.";
        let out = blend(&[ranked("a", best, 0.80), ranked("b", other, 0.75)], true).unwrap();

        assert!(out.blended);
        assert_eq!(out.primary_model, "a");
        assert_eq!(out.contributors, vec!["a".to_string(), "b".to_string()]);
        assert!(out.text.starts_with(best));
        assert!(out.text.contains("Additional perspective (b):"));
        assert!(out.text.contains("add an index"));
        // duplicated sentence is not repeated
        assert_eq!(out.text.matches("Use a connection pool.").count(), 1);
    }

    #[test]
    fn test_blend_disabled() {
        let out = blend(&[ranked("a", "One two three four.", 0.8), ranked("b", "Five six seven eight.", 0.79)], false)
            .unwrap();
        assert!(!out.blended);
    }

    #[test]
    fn test_blend_nothing_new() {
        let out = blend(&[ranked("a", "Paris is the capital.", 0.8), ranked("b", "Paris is the capital.", 0.79)], true)
            .unwrap();
        assert!(!out.blended);
    }

    #[test]
    fn test_blend_empty() {
        assert!(blend(&[], true).is_none());
        assert!(blend(&[ranked("a", "  ", 0.0)], true).is_none());
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("First one. Second? Version 1.5 ships\nThird line");
        assert_eq!(s, vec!["First one.", "Second?", "Version 1.5 ships", "Third line"]);
    }
}
