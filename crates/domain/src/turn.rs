use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one user submission and the reply that answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A progress note collected while a turn is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub message: String,
    #[serde(default)]
    pub completed: bool,
}

impl ProgressStep {
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            completed: false,
        }
    }
}

/// Why a turn ended without an answer.
///
/// Every variant terminates the turn and produces exactly one synthesized
/// bot message.  Lost individual frames are not represented here; they are
/// absorbed by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnFailure {
    /// The request could not be sent, the backend answered with a failure
    /// status, or the connection dropped mid-stream.
    TransportFailure { detail: String },
    /// The body ended without a terminal frame.
    IncompleteStream { progress_frames: usize },
    /// The response carried no body bytes at all.
    EmptyBody,
    /// The backend sent an `error` frame.
    BackendError { message: String },
    /// The turn was cancelled or its reader abandoned.
    Cancelled,
}

impl TurnFailure {
    /// Short machine-readable category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::TransportFailure { .. } => "transport_failure",
            Self::IncompleteStream { .. } => "incomplete_stream",
            Self::EmptyBody => "empty_body",
            Self::BackendError { .. } => "backend_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// The text shown to the user in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            Self::TransportFailure { .. } => {
                "Sorry, something went wrong while contacting the server. Please try again.".into()
            }
            Self::IncompleteStream { .. } => {
                "No complete response was received from the server. Please try again.".into()
            }
            Self::EmptyBody => "The server returned an empty response.".into(),
            Self::BackendError { message } if message.trim().is_empty() => {
                "The server could not process your question.".into()
            }
            Self::BackendError { message } => {
                format!("The server could not process your question: {message}")
            }
            Self::Cancelled => "The request was cancelled.".into(),
        }
    }
}

impl fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportFailure { detail } => write!(f, "transport failure: {detail}"),
            Self::IncompleteStream { progress_frames } => write!(
                f,
                "stream ended without a terminal frame after {progress_frames} progress frame(s)"
            ),
            Self::EmptyBody => write!(f, "empty response body"),
            Self::BackendError { message } => write!(f, "backend error: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
