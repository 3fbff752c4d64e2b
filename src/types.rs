//! Core types for the Minerva chat server
//!
//! These are the wire types shared by the HTTP/WebSocket surface, the
//! chat dispatcher and the CLI.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a chat message should be answered
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Consult several models, rank their answers and blend the best
    #[default]
    #[serde(alias = "think-tank", alias = "thinktank")]
    ThinkTank,
    /// Ask only the highest-scoring model
    Single,
    /// Canned local answer, no provider calls
    Simulated,
}

impl ChatMode {
    pub fn name(&self) -> &'static str {
        match self {
            ChatMode::ThinkTank => "think_tank",
            ChatMode::Single => "single",
            ChatMode::Simulated => "simulated",
        }
    }
}

impl std::str::FromStr for ChatMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "think_tank" | "thinktank" => Ok(ChatMode::ThinkTank),
            "single" => Ok(ChatMode::Single),
            "simulated" => Ok(ChatMode::Simulated),
            other => Err(anyhow::anyhow!("Unknown mode: {}", other)),
        }
    }
}

/// Incoming chat payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: Option<ChatMode>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Which model(s) produced an answer and why
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model whose answer leads the response ("fallback" or "simulated" when no provider answered)
    pub model: String,
    pub provider: String,
    pub mode: ChatMode,
    pub query_type: String,
    pub models_consulted: Vec<String>,
    /// Think Tank selection scores, best first
    pub scores: Vec<(String, f64)>,
    pub blended: bool,
    pub simulated: bool,
}

/// Outgoing chat payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub model_info: ModelInfo,
    /// Wall-clock seconds spent answering
    pub time: f64,
    pub session_id: String,
    #[serde(default)]
    pub insight_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One turn of a conversation as sent to a provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// User rating of a response, per criterion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub insight_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub query: String,
    pub response: String,
    /// criterion -> score in 1..=10
    pub scores: BTreeMap<String, u8>,
    #[serde(default)]
    pub feedback: String,
}

/// Result of recording feedback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub ranking_id: String,
    pub overall: f64,
    /// (old, new) learned confidence of the rated model
    pub confidence_change: Option<(f64, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_minimal() {
        let req: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(req.message, "hi");
        assert!(req.session_id.is_none());
        assert!(req.mode.is_none());
    }

    #[test]
    fn test_chat_request_with_mode() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "session_id": "s1", "mode": "single"}"#)
                .unwrap();
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        assert_eq!(req.mode, Some(ChatMode::Single));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let res: Result<ChatRequest, _> =
            serde_json::from_str(r#"{"message": "hi", "mode": "turbo"}"#);
        assert!(res.is_err());
        assert!("turbo".parse::<ChatMode>().is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("think-tank".parse::<ChatMode>().unwrap(), ChatMode::ThinkTank);
        assert_eq!("Simulated".parse::<ChatMode>().unwrap(), ChatMode::Simulated);
    }

    #[test]
    fn test_role_roundtrip_names() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }
}
