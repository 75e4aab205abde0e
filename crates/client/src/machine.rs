//! Per-turn state machine.
//!
//! ```text
//! Idle ─Admit─▶ AwaitingFirstByte ─Progress─▶ Streaming ─Terminal─▶ Finalizing ─Settle─▶ Idle
//!                      │                          │                     │
//!                      └──────────Fail────────────┴─────────Fail────────┴─▶ Failed ─Reset─▶ Idle
//! ```
//!
//! [`TurnMachine::apply`] is the only way state changes.  It never performs
//! I/O; anything the outside world must do is returned as an [`Effect`].

use std::fmt;

use serde::Serialize;

use cs_domain::frame::CompletePayload;
use cs_domain::turn::{ProgressStep, TurnFailure, TurnId};
use cs_sessions::BotMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AwaitingFirstByte,
    Streaming,
    Finalizing,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingFirstByte => "awaiting_first_byte",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
            Self::Failed => "failed",
        }
    }

    /// A turn occupies the machine.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::AwaitingFirstByte | Self::Streaming | Self::Finalizing
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum MachineInput {
    Admit { turn_id: TurnId },
    Progress { message: String },
    Terminal(CompletePayload),
    Settle,
    Fail(TurnFailure),
    Reset,
}

impl MachineInput {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Admit { .. } => "admit",
            Self::Progress { .. } => "progress",
            Self::Terminal(_) => "terminal",
            Self::Settle => "settle",
            Self::Fail(_) => "fail",
            Self::Reset => "reset",
        }
    }
}

/// Work the caller must carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The backend returned a session token with this answer.
    RetainSession(String),
    /// Append this reply to the conversation history.
    AppendHistory(BotMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("input `{input}` is not valid in phase {phase}")]
pub struct InvalidTransition {
    pub phase: Phase,
    pub input: &'static str,
}

/// Observable view of the machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSnapshot {
    pub phase: Phase,
    pub turn_id: Option<TurnId>,
    pub typing: bool,
    pub steps: Vec<ProgressStep>,
}

#[derive(Debug)]
pub struct TurnMachine {
    phase: Phase,
    turn_id: Option<TurnId>,
    typing: bool,
    steps: Vec<ProgressStep>,
    /// The answer built on the terminal frame, appended on settle.
    pending: Option<BotMessage>,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            turn_id: None,
            typing: false,
            steps: Vec::new(),
            pending: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn_id(&self) -> Option<TurnId> {
        self.turn_id
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn steps(&self) -> &[ProgressStep] {
        &self.steps
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            phase: self.phase,
            turn_id: self.turn_id,
            typing: self.typing,
            steps: self.steps.clone(),
        }
    }

    /// Apply one input.  On error nothing has changed.
    pub fn apply(&mut self, input: MachineInput) -> Result<Vec<Effect>, InvalidTransition> {
        let invalid = InvalidTransition {
            phase: self.phase,
            input: input.name(),
        };

        match (self.phase, input) {
            (Phase::Idle, MachineInput::Admit { turn_id }) => {
                self.turn_id = Some(turn_id);
                self.typing = true;
                self.steps.clear();
                self.pending = None;
                self.phase = Phase::AwaitingFirstByte;
                Ok(Vec::new())
            }

            (Phase::AwaitingFirstByte | Phase::Streaming, MachineInput::Progress { message }) => {
                self.complete_last_step();
                self.steps.push(ProgressStep::pending(message));
                self.phase = Phase::Streaming;
                Ok(Vec::new())
            }

            (Phase::AwaitingFirstByte | Phase::Streaming, MachineInput::Terminal(payload)) => {
                let turn_id = self.turn_id.ok_or(invalid)?;
                self.complete_last_step();

                let mut effects = Vec::new();
                if let Some(token) = payload.session_token() {
                    effects.push(Effect::RetainSession(token.to_owned()));
                }
                let citations = payload.citations().to_vec();
                self.pending = Some(BotMessage::answer(
                    turn_id,
                    payload.response,
                    self.steps.clone(),
                    citations,
                ));
                self.phase = Phase::Finalizing;
                Ok(effects)
            }

            (Phase::Finalizing, MachineInput::Settle) => {
                let message = self.pending.take().ok_or(invalid)?;
                self.steps.clear();
                self.typing = false;
                self.turn_id = None;
                self.phase = Phase::Idle;
                Ok(vec![Effect::AppendHistory(message)])
            }

            (phase, MachineInput::Fail(failure)) if phase.is_in_flight() => {
                let turn_id = self.turn_id.ok_or(invalid)?;
                self.typing = false;
                self.steps.clear();
                self.pending = None;
                self.phase = Phase::Failed;
                Ok(vec![Effect::AppendHistory(BotMessage::failure(turn_id, failure))])
            }

            (Phase::Failed, MachineInput::Reset) => {
                self.turn_id = None;
                self.phase = Phase::Idle;
                Ok(Vec::new())
            }

            _ => Err(invalid),
        }
    }

    fn complete_last_step(&mut self) {
        if let Some(last) = self.steps.last_mut() {
            last.completed = true;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use cs_domain::frame::Citation;

    fn progress(m: &str) -> MachineInput {
        MachineInput::Progress { message: m.into() }
    }

    fn complete(response: &str, token: Option<&str>) -> MachineInput {
        MachineInput::Terminal(CompletePayload {
            response: response.into(),
            session_id: token.map(str::to_owned),
            citation_array: None,
        })
    }

    fn admitted() -> (TurnMachine, TurnId) {
        let mut m = TurnMachine::new();
        let id = TurnId::new();
        m.apply(MachineInput::Admit { turn_id: id }).unwrap();
        (m, id)
    }

    #[test]
    fn admit_turns_typing_on() {
        let (m, id) = admitted();
        assert_eq!(m.phase(), Phase::AwaitingFirstByte);
        assert!(m.is_typing());
        assert_eq!(m.turn_id(), Some(id));
        assert!(m.steps().is_empty());
    }

    #[test]
    fn only_the_last_step_is_pending() {
        let (mut m, _) = admitted();
        m.apply(progress("Searching")).unwrap();
        m.apply(progress("Reading docs")).unwrap();
        m.apply(progress("Summarizing")).unwrap();
        assert_eq!(m.phase(), Phase::Streaming);
        let flags: Vec<bool> = m.steps().iter().map(|s| s.completed).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn full_happy_path() {
        let (mut m, id) = admitted();
        m.apply(progress("Searching")).unwrap();
        m.apply(progress("Reading docs")).unwrap();

        let effects = m.apply(complete("Here is the answer", Some("abc123"))).unwrap();
        assert_eq!(effects, vec![Effect::RetainSession("abc123".into())]);
        assert_eq!(m.phase(), Phase::Finalizing);
        assert!(m.is_typing());
        assert!(m.steps().iter().all(|s| s.completed));

        let effects = m.apply(MachineInput::Settle).unwrap();
        assert_eq!(m.phase(), Phase::Idle);
        assert!(!m.is_typing());
        assert!(m.steps().is_empty());
        match &effects[..] {
            [Effect::AppendHistory(msg)] => {
                assert_eq!(msg.turn_id, id);
                assert_eq!(msg.content, "Here is the answer");
                assert_eq!(msg.steps.len(), 2);
                assert!(msg.steps.iter().all(|s| s.completed));
                assert!(!msg.is_failure());
            }
            other => panic!("unexpected effects: {other:?}"),
        }
    }

    #[test]
    fn terminal_without_progress_or_token() {
        let (mut m, _) = admitted();
        let effects = m.apply(complete("ok", None)).unwrap();
        assert!(effects.is_empty());
        let effects = m.apply(MachineInput::Settle).unwrap();
        assert!(matches!(&effects[..], [Effect::AppendHistory(msg)] if msg.steps.is_empty()));
    }

    #[test]
    fn blank_token_is_not_retained() {
        let (mut m, _) = admitted();
        let effects = m.apply(complete("ok", Some("  "))).unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn citations_keep_order_and_duplicates() {
        let (mut m, _) = admitted();
        let cite = |n: &str| Citation {
            source_name: n.into(),
            excerpt: String::new(),
            link: String::new(),
        };
        m.apply(MachineInput::Terminal(CompletePayload {
            response: "r".into(),
            session_id: None,
            citation_array: Some(vec![cite("B"), cite("A"), cite("B")]),
        }))
        .unwrap();
        let effects = m.apply(MachineInput::Settle).unwrap();
        let Effect::AppendHistory(msg) = &effects[0] else {
            panic!("expected history effect");
        };
        let names: Vec<&str> = msg.citations.iter().map(|c| c.source_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "B"]);
    }

    #[test]
    fn failure_clears_progress_and_synthesizes_message() {
        let (mut m, id) = admitted();
        m.apply(progress("Searching")).unwrap();
        m.apply(progress("Reading docs")).unwrap();

        let failure = TurnFailure::IncompleteStream { progress_frames: 2 };
        let effects = m.apply(MachineInput::Fail(failure.clone())).unwrap();
        assert_eq!(m.phase(), Phase::Failed);
        assert!(!m.is_typing());
        assert!(m.steps().is_empty());
        match &effects[..] {
            [Effect::AppendHistory(msg)] => {
                assert_eq!(msg.turn_id, id);
                assert_eq!(msg.failure.as_ref(), Some(&failure));
                assert!(msg.steps.is_empty());
            }
            other => panic!("unexpected effects: {other:?}"),
        }

        m.apply(MachineInput::Reset).unwrap();
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.turn_id(), None);
    }

    #[test]
    fn fail_from_awaiting_first_byte() {
        let (mut m, _) = admitted();
        let effects = m.apply(MachineInput::Fail(TurnFailure::EmptyBody)).unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(m.phase(), Phase::Failed);
    }

    #[test]
    fn fail_during_finalizing_drops_pending_answer() {
        let (mut m, _) = admitted();
        m.apply(complete("answer", None)).unwrap();
        let effects = m.apply(MachineInput::Fail(TurnFailure::Cancelled)).unwrap();
        assert!(matches!(&effects[..], [Effect::AppendHistory(msg)] if msg.is_failure()));
        assert!(m.apply(MachineInput::Settle).is_err());
    }

    #[test]
    fn invalid_inputs_leave_state_untouched() {
        let mut m = TurnMachine::new();
        for input in [
            progress("x"),
            complete("x", None),
            MachineInput::Settle,
            MachineInput::Fail(TurnFailure::EmptyBody),
            MachineInput::Reset,
        ] {
            let name = input.name();
            let err = m.apply(input).unwrap_err();
            assert_eq!(err, InvalidTransition { phase: Phase::Idle, input: name });
            assert_eq!(m.snapshot(), TurnMachine::new().snapshot());
        }

        let (mut m, _) = admitted();
        m.apply(progress("Searching")).unwrap();
        let before = m.snapshot();
        assert!(m.apply(MachineInput::Admit { turn_id: TurnId::new() }).is_err());
        assert!(m.apply(MachineInput::Settle).is_err());
        assert!(m.apply(MachineInput::Reset).is_err());
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn progress_after_terminal_is_rejected() {
        let (mut m, _) = admitted();
        m.apply(complete("done", None)).unwrap();
        assert!(m.apply(progress("late")).is_err());
        assert!(m.apply(complete("again", None)).is_err());
        assert_eq!(m.phase(), Phase::Finalizing);
    }
}
