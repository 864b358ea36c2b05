use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an entry entered the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    Voice,
    System,
}

/// One line of the on-screen conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurnLogEntry {
    pub speaker: String,
    pub text: String,
    pub source_kind: SourceKind,
    pub at: DateTime<Utc>,
}

/// Append-only conversation log
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatLog {
    entries: Vec<ChatTurnLogEntry>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log seeded with a system welcome line
    pub fn with_welcome(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        let mut log = Self::new();
        log.push(speaker, text, SourceKind::System);
        log
    }

    pub fn push(&mut self, speaker: impl Into<String>, text: impl Into<String>, source_kind: SourceKind) {
        self.entries.push(ChatTurnLogEntry {
            speaker: speaker.into(),
            text: text.into(),
            source_kind,
            at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[ChatTurnLogEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ChatTurnLogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
