//! Notifications for a presentation layer observing a conversation.

use serde::Serialize;

use cs_domain::turn::{ProgressStep, TurnFailure, TurnId};
use cs_sessions::BotMessage;

use crate::machine::Phase;

/// Broadcast to every subscriber of a [`Conversation`](crate::gate::Conversation).
///
/// Receivers that fall behind lose the oldest events; the conversation
/// itself never waits on them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    TurnStarted {
        turn_id: TurnId,
        query: String,
    },
    PhaseChanged {
        phase: Phase,
        typing: bool,
    },
    /// The full ordered progress list after a new step arrived.
    Progress {
        turn_id: TurnId,
        steps: Vec<ProgressStep>,
    },
    Answer {
        message: BotMessage,
    },
    Failed {
        turn_id: TurnId,
        failure: TurnFailure,
    },
    Rejected {
        reason: String,
    },
    HistoryTruncated {
        turn_id: TurnId,
        removed: usize,
    },
    HistoryCleared {
        removed: usize,
    },
    SideContentToggled {
        open: bool,
    },
}
