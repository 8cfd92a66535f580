use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The call a tool turn answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub call_id: String,
    pub name: String,
    /// Arguments as the model produced them (JSON text)
    pub arguments: String,
}

/// One immutable conversation entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub tool: Option<ToolMetadata>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(metadata: ToolMetadata, result: impl Into<String>) -> Self {
        Self {
            tool: Some(metadata),
            ..Self::new(Role::Tool, result)
        }
    }
}

/// Append-only conversation history
///
/// Turns enter only through `commit`, so readers never observe a partial
/// reply. Snapshots are cheap to hand to a running response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a system prompt (skipped when empty)
    pub fn with_system_prompt(prompt: &str) -> Self {
        let mut transcript = Self::new();
        if !prompt.trim().is_empty() {
            transcript.commit(Turn::system(prompt));
        }
        transcript
    }

    pub fn commit(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn snapshot(&self) -> Arc<[Turn]> {
        self.turns.clone().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_optional() {
        assert!(Transcript::with_system_prompt("  ").is_empty());
        let transcript = Transcript::with_system_prompt("Be brief.");
        assert_eq!(transcript.turns()[0].role, Role::System);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut transcript = Transcript::new();
        transcript.commit(Turn::user("hi"));
        let snapshot = transcript.snapshot();
        transcript.commit(Turn::assistant("hello"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(transcript.len(), 2);
        assert_eq!(snapshot[0].content, "hi");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
