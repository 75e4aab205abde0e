//! Wire types for the `/query` NDJSON protocol.
//!
//! Each line of the response body is one JSON object discriminated by a
//! `type` field (`kind` is accepted too).  The backend only ever sends the
//! three kinds below; anything else is skipped by the decoder.

use serde::{Deserialize, Serialize};

pub const KIND_PROCESSING_STEP: &str = "processing_step";
pub const KIND_COMPLETE: &str = "complete";
pub const KIND_ERROR: &str = "error";

/// Field names that may carry the frame discriminator, in lookup order.
pub const DISCRIMINATOR_FIELDS: [&str; 2] = ["type", "kind"];

/// Whether `kind` names a frame the client acts on.
pub fn is_recognized_kind(kind: &str) -> bool {
    matches!(kind, KIND_PROCESSING_STEP | KIND_COMPLETE | KIND_ERROR)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One decoded event frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum EventFrame {
    /// A progress note shown while the turn is in flight.
    #[serde(rename = "processing_step")]
    ProcessingStep { message: String },

    /// The terminal answer.
    #[serde(rename = "complete")]
    Complete(CompletePayload),

    /// The backend gave up on the query.  Terminal.
    #[serde(rename = "error")]
    Error { message: String },
}

impl EventFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessingStep { .. } => KIND_PROCESSING_STEP,
            Self::Complete(_) => KIND_COMPLETE,
            Self::Error { .. } => KIND_ERROR,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ProcessingStep { .. })
    }
}

/// Payload of a `complete` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePayload {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, rename = "citation_array", alias = "citations")]
    pub citation_array: Option<Vec<Citation>>,
}

impl CompletePayload {
    /// Citations in the order the backend sent them (empty when absent).
    pub fn citations(&self) -> &[Citation] {
        self.citation_array.as_deref().unwrap_or_default()
    }

    /// The session token, ignoring empty strings.
    pub fn session_token(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A source the answer was grounded on.
///
/// The backend names these fields `company_name` / `content` / `link`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, rename = "company_name", alias = "source_name")]
    pub source_name: String,
    #[serde(default, rename = "content", alias = "excerpt")]
    pub excerpt: String,
    #[serde(default)]
    pub link: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Body of `POST /query`, sent once per turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
