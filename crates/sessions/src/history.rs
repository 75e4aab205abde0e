//! Ordered conversation history.
//!
//! Entries are append-only.  The two exceptions are [`ConversationHistory::clear`]
//! and [`ConversationHistory::truncate_after_user`], both of which cut at an
//! entry boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cs_domain::frame::Citation;
use cs_domain::turn::{ProgressStep, TurnFailure, TurnId};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the user asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub turn_id: TurnId,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// The reply to a user turn: either an answer or a synthesized failure notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotMessage {
    /// The user turn this replies to.
    pub turn_id: TurnId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ProgressStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TurnFailure>,
    pub at: DateTime<Utc>,
}

impl BotMessage {
    pub fn answer(
        turn_id: TurnId,
        content: String,
        steps: Vec<ProgressStep>,
        citations: Vec<Citation>,
    ) -> Self {
        Self {
            turn_id,
            content,
            steps,
            citations,
            failure: None,
            at: Utc::now(),
        }
    }

    /// A failure notice.  Carries no progress steps and no citations.
    pub fn failure(turn_id: TurnId, failure: TurnFailure) -> Self {
        Self {
            turn_id,
            content: failure.user_message(),
            steps: Vec::new(),
            citations: Vec::new(),
            failure: Some(failure),
            at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HistoryEntry {
    User(UserMessage),
    Bot(BotMessage),
}

impl HistoryEntry {
    pub fn user(turn_id: TurnId, content: impl Into<String>) -> Self {
        Self::User(UserMessage {
            turn_id,
            content: content.into(),
            at: Utc::now(),
        })
    }

    pub fn turn_id(&self) -> TurnId {
        match self {
            Self::User(m) => m.turn_id,
            Self::Bot(m) => m.turn_id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::User(m) => &m.content,
            Self::Bot(m) => &m.content,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::User(m) => m.at,
            Self::Bot(m) => m.at,
        }
    }

    pub fn as_user(&self) -> Option<&UserMessage> {
        match self {
            Self::User(m) => Some(m),
            Self::Bot(_) => None,
        }
    }

    pub fn as_bot(&self) -> Option<&BotMessage> {
        match self {
            Self::Bot(m) => Some(m),
            Self::User(_) => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Locate a user entry by turn id.
    pub fn find_user(&self, turn_id: TurnId) -> Option<(usize, &UserMessage)> {
        self.entries
            .iter()
            .enumerate()
            .find_map(|(i, e)| e.as_user().filter(|m| m.turn_id == turn_id).map(|m| (i, m)))
    }

    /// User turns in submission order.
    pub fn user_turns(&self) -> impl Iterator<Item = &UserMessage> {
        self.entries.iter().filter_map(HistoryEntry::as_user)
    }

    /// The most recent reply, answer or failure.
    pub fn last_bot(&self) -> Option<&BotMessage> {
        self.entries.iter().rev().find_map(HistoryEntry::as_bot)
    }

    /// Drop every entry after the user entry for `turn_id`.
    ///
    /// Returns the removed tail, or `None` (history untouched) when no user
    /// entry has that id.
    pub fn truncate_after_user(&mut self, turn_id: TurnId) -> Option<Vec<HistoryEntry>> {
        let (index, _) = self.find_user(turn_id)?;
        Some(self.entries.split_off(index + 1))
    }

    /// Remove everything.  Returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
