//! Conversation memory
//!
//! Per-session message history in SQLite, replayed to models as context.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{ChatMessage, Role};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL,          -- system | user | assistant
    content TEXT NOT NULL,
    model TEXT,                  -- NULL for user turns
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub model: Option<String>,
    pub created_at: String,
}

impl StoredMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage { role: self.role, content: self.content.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: i64,
    pub last_message_at: String,
}

pub struct ConversationMemory {
    conn: Connection,
}

impl ConversationMemory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open memory database at {:?}", path))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn append(&self, session_id: &str, role: Role, content: &str, model: Option<&str>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO messages (session_id, role, content, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, role.as_str(), content, model, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The last `limit` messages of a session, oldest first
    pub fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, role, content, model, created_at FROM messages
             WHERE session_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            let role: String = row.get(2)?;
            Ok(StoredMessage {
                id: row.get(0)?,
                session_id: row.get(1)?,
                role: Role::parse(&role).unwrap_or(Role::User),
                content: row.get(3)?,
                model: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Delete a session's history; returns the number of messages removed
    pub fn clear(&self, session_id: &str) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?)
    }

    pub fn sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, COUNT(*), MAX(created_at) FROM messages
             GROUP BY session_id
             ORDER BY MAX(id) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SessionSummary {
                session_id: row.get(0)?,
                message_count: row.get(1)?,
                last_message_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn message_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_table() {
        let dir = tempdir().unwrap();
        let memory = ConversationMemory::open(&dir.path().join("sub").join("memory.db")).unwrap();

        let tables: Vec<String> = memory
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(tables.contains(&"messages".to_string()));
    }

    #[test]
    fn test_recent_is_oldest_first_and_limited() {
        let memory = ConversationMemory::in_memory().unwrap();
        memory.append("s1", Role::User, "one", None).unwrap();
        memory.append("s1", Role::Assistant, "two", Some("gpt-4o")).unwrap();
        memory.append("s1", Role::User, "three", None).unwrap();
        memory.append("s2", Role::User, "other", None).unwrap();

        let recent = memory.recent("s1", 2).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);
        assert_eq!(recent[0].role, Role::Assistant);
        assert_eq!(recent[0].model.as_deref(), Some("gpt-4o"));
        assert_eq!(recent[1].to_chat_message(), ChatMessage::user("three"));
    }

    #[test]
    fn test_clear_only_touches_one_session() {
        let memory = ConversationMemory::in_memory().unwrap();
        memory.append("s1", Role::User, "a", None).unwrap();
        memory.append("s1", Role::User, "b", None).unwrap();
        memory.append("s2", Role::User, "c", None).unwrap();

        assert_eq!(memory.clear("s1").unwrap(), 2);
        assert!(memory.recent("s1", 10).unwrap().is_empty());
        assert_eq!(memory.message_count().unwrap(), 1);
    }

    #[test]
    fn test_sessions_summary() {
        let memory = ConversationMemory::in_memory().unwrap();
        memory.append("s1", Role::User, "a", None).unwrap();
        memory.append("s2", Role::User, "b", None).unwrap();
        memory.append("s2", Role::Assistant, "c", Some("m")).unwrap();

        let sessions = memory.sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "s2");
        assert_eq!(sessions[0].message_count, 2);
    }
}
