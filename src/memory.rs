//! Conversation memory.
//!
//! Long-term memory is delegated to an external collaborator behind
//! [`MemoryStore`]. The in-session transcript lives in a
//! [`ConversationContext`] that every pipeline generation shares by
//! reference.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        })
    }
}

/// One completed conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// External long-term memory.
#[async_trait]
pub trait MemoryStore: Send + Sync + 'static {
    /// Record a completed turn.
    async fn append(&self, role: Role, content: &str) -> Result<()>;

    /// Text to add to the instructions, empty when nothing is known.
    async fn fetch_context(&self) -> Result<String>;
}

impl fmt::Debug for dyn MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MemoryStore")
    }
}

/// Shared handle to the session's memory store.
pub type MemoryHandle = Arc<dyn MemoryStore>;

/// Process-local [`MemoryStore`] keeping the most recent turns.
#[derive(Debug)]
pub struct InMemoryStore {
    user_id: String,
    max_turns: usize,
    turns: Mutex<Vec<Turn>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(user_id: impl Into<String>, max_turns: usize) -> Self {
        Self {
            user_id: user_id.into(),
            max_turns: max_turns.max(1),
            turns: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn turns(&self) -> Vec<Turn> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Turn>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn append(&self, role: Role, content: &str) -> Result<()> {
        let mut turns = self.lock();
        turns.push(Turn {
            role,
            content: content.to_owned(),
            at: Utc::now(),
        });
        let excess = turns.len().saturating_sub(self.max_turns);
        turns.drain(..excess);
        Ok(())
    }

    async fn fetch_context(&self) -> Result<String> {
        let turns = self.lock();
        if turns.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::from("Recent conversation:");
        for turn in turns.iter() {
            out.push_str(&format!("\n- {}: {}", turn.role, turn.content));
        }
        Ok(out)
    }
}

/// The in-session transcript, shared across pipeline generations.
///
/// Clones refer to the same transcript.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    turns: Arc<Mutex<Vec<Turn>>>,
}

impl ConversationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Turn>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a turn. Blank content is ignored.
    pub fn push(&self, role: Role, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }
        self.lock().push(Turn {
            role,
            content: content.to_owned(),
            at: Utc::now(),
        });
        true
    }

    #[must_use]
    pub fn turns(&self) -> Vec<Turn> {
        self.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether both values refer to the same transcript.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.turns, &other.turns)
    }
}

/// Clip `text` to at most `max_chars` characters, keeping the most recent tail.
#[must_use]
pub fn clip_context(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
