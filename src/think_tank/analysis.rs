//! Query analysis
//!
//! Classifies a message by keyword tables into a query type, a
//! complexity tier and a set of capability weights. No model call,
//! no network.

use serde::{Deserialize, Serialize};

use super::capabilities::Capabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Coding,
    Math,
    Creative,
    Reasoning,
    Factual,
    Conversational,
}

impl QueryType {
    /// Tie-break order when two types match equally often
    const PRIORITY: [QueryType; 6] = [
        QueryType::Coding,
        QueryType::Math,
        QueryType::Creative,
        QueryType::Reasoning,
        QueryType::Factual,
        QueryType::Conversational,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QueryType::Coding => "coding",
            QueryType::Math => "math",
            QueryType::Creative => "creative",
            QueryType::Reasoning => "reasoning",
            QueryType::Factual => "factual",
            QueryType::Conversational => "conversational",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            QueryType::Coding => &[
                "code", "function", "bug", "compile", "compiler", "error", "rust", "python",
                "javascript", "typescript", "api", "regex", "sql", "debug", "refactor", "class",
                "variable", "stack trace", "program", "script", "implement", "library", "git",
                "unit test", "exception",
            ],
            QueryType::Math => &[
                "calculate", "equation", "integral", "derivative", "probability", "solve",
                "sum of", "prime", "math", "percent", "percentage", "algebra", "statistics",
                "matrix", "geometry", "proof",
            ],
            QueryType::Creative => &[
                "poem", "story", "song", "creative", "imagine", "slogan", "haiku", "fiction",
                "character", "lyrics", "brainstorm", "novel", "joke",
            ],
            QueryType::Reasoning => &[
                "should i", "should we", "why", "compare", "pros and cons", "trade-off",
                "tradeoff", "decide", "analyze", "analyse", "evaluate", "strategy", "better",
                "versus", "vs",
            ],
            QueryType::Factual => &[
                "what is", "what are", "who is", "who was", "when did", "when was", "where is",
                "how many", "define", "definition", "history of", "capital of", "fact",
            ],
            QueryType::Conversational => &[
                "hello", "hi", "hey", "thanks", "thank you", "how are you", "good morning",
                "good evening", "bye",
            ],
        }
    }

    /// Capability emphasis for a query of this type
    fn base_weights(&self) -> Capabilities {
        match self {
            QueryType::Coding => Capabilities {
                reasoning: 0.25, coding: 0.5, creativity: 0.0, factual: 0.1, conversation: 0.05, math: 0.1,
            },
            QueryType::Math => Capabilities {
                reasoning: 0.3, coding: 0.1, creativity: 0.0, factual: 0.1, conversation: 0.0, math: 0.5,
            },
            QueryType::Creative => Capabilities {
                reasoning: 0.1, coding: 0.0, creativity: 0.6, factual: 0.1, conversation: 0.2, math: 0.0,
            },
            QueryType::Reasoning => Capabilities {
                reasoning: 0.6, coding: 0.0, creativity: 0.0, factual: 0.2, conversation: 0.1, math: 0.1,
            },
            QueryType::Factual => Capabilities {
                reasoning: 0.2, coding: 0.0, creativity: 0.0, factual: 0.6, conversation: 0.2, math: 0.0,
            },
            QueryType::Conversational => Capabilities {
                reasoning: 0.1, coding: 0.0, creativity: 0.2, factual: 0.1, conversation: 0.6, math: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn name(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }

    fn bump(self) -> Self {
        match self {
            Complexity::Simple => Complexity::Moderate,
            _ => Complexity::Complex,
        }
    }
}

const COMPLEX_INDICATORS: &[&str] = &[
    "step by step", "in detail", "explain", "comprehensive", "analyze", "compare", "design",
    "architecture", "prove", "in depth",
];

/// Result of analysing one message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    /// Other types that matched at least one keyword
    pub secondary: Vec<QueryType>,
    pub complexity: Complexity,
    /// Capability weights, summing to 1
    pub weights: Capabilities,
    /// Tags matched against model strengths
    pub tags: Vec<String>,
    /// Content words, used for relevance scoring
    pub keywords: Vec<String>,
}

/// Lowercased text with punctuation turned into single spaces, padded for phrase matching
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '+' || c == '#' { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn matches_term(normalized: &str, term: &str) -> bool {
    normalized.contains(&format!(" {} ", term))
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "all", "can", "how", "what", "when",
    "where", "who", "why", "with", "this", "that", "from", "have", "has", "was", "were", "will",
    "would", "could", "should", "does", "did", "about", "into", "there", "their", "them", "then",
    "than", "some", "any", "its", "our", "out", "get", "give", "tell", "please", "which",
];

/// Content words of a text (lowercase, length > 2, no stopwords), in first-seen order
pub fn content_words(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for word in normalize(text).split_whitespace() {
        let word = word.trim_matches('-');
        if word.chars().count() > 2 && !STOPWORDS.contains(&word) && !seen.iter().any(|w| w == word) {
            seen.push(word.to_string());
        }
    }
    seen
}

/// Classify a message
pub fn analyze_query(text: &str) -> QueryAnalysis {
    let normalized = normalize(text);

    let mut counts: Vec<(QueryType, usize)> = QueryType::PRIORITY
        .iter()
        .map(|t| (*t, t.keywords().iter().filter(|k| matches_term(&normalized, k)).count()))
        .collect();

    // Stable sort keeps PRIORITY order for equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let query_type = match counts.first() {
        Some((t, n)) if *n > 0 => *t,
        _ => QueryType::Conversational,
    };
    let secondary: Vec<QueryType> = counts
        .iter()
        .filter(|(t, n)| *n > 0 && *t != query_type)
        .map(|(t, _)| *t)
        .collect();

    let complexity = classify_complexity(text, &normalized);

    let mut weights = query_type.base_weights();
    for t in &secondary {
        weights = weights.add_scaled(&t.base_weights(), 0.25);
    }
    let weights = weights.normalized();

    let mut tags = vec![query_type.name().to_string()];
    tags.extend(secondary.iter().map(|t| t.name().to_string()));
    match complexity {
        Complexity::Simple => tags.push("fast".to_string()),
        Complexity::Complex => tags.push("long-form".to_string()),
        Complexity::Moderate => {}
    }
    if text.chars().any(|c| c.is_alphabetic() && !c.is_ascii()) {
        tags.push("multilingual".to_string());
    }

    QueryAnalysis {
        query_type,
        secondary,
        complexity,
        weights,
        tags,
        keywords: content_words(text),
    }
}

fn classify_complexity(text: &str, normalized: &str) -> Complexity {
    let word_count = text.split_whitespace().count();
    let base = if word_count <= 8 {
        Complexity::Simple
    } else if word_count <= 40 {
        Complexity::Moderate
    } else {
        Complexity::Complex
    };

    if COMPLEX_INDICATORS.iter().any(|k| matches_term(normalized, k)) {
        base.bump()
    } else {
        base
    }
}
