//! The request gate: one [`Conversation`] admits at most one turn at a time.
//!
//! A turn runs entirely on the task that called [`Conversation::submit`] (or
//! [`Conversation::regenerate`]).  That task owns the frame stream and is the
//! only writer of the turn machine while the turn is in flight.  History and
//! the session token are shared with the caller-facing accessors behind a
//! short-lived mutex that is never held across an await point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use cs_domain::config::{Config, DecoderConfig};
use cs_domain::frame::{CompletePayload, EventFrame, QueryRequest};
use cs_domain::trace::TraceEvent;
use cs_domain::turn::{TurnFailure, TurnId};
use cs_sessions::{BotMessage, ConversationHistory, HistoryEntry, HistoryStore};
use cs_stream::{frame_stream, ChatTransport, FrameItem};

use crate::events::ChatEvent;
use crate::machine::{Effect, MachineInput, MachineSnapshot, Phase, TurnMachine};

const EVENT_CAPACITY: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("a turn is already in flight")]
    Busy,
    #[error("query is empty")]
    EmptyQuery,
    #[error("operation requires an idle conversation")]
    NotIdle,
    #[error("no user turn with id {0}")]
    UnknownTurn(TurnId),
    #[error(transparent)]
    Store(#[from] cs_domain::error::Error),
}

/// Outcome of one admitted turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub turn_id: TurnId,
    /// The reply appended to history: the answer, or the failure notice.
    pub reply: BotMessage,
    pub session_token: Option<String>,
    pub duration_ms: u64,
}

impl TurnReport {
    pub fn is_answer(&self) -> bool {
        !self.reply.is_failure()
    }
}

/// Observable state of a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    #[serde(flatten)]
    pub machine: MachineSnapshot,
    pub busy: bool,
    pub history_len: usize,
    pub has_session: bool,
    pub side_content_open: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Shared {
    history: ConversationHistory,
    session_token: Option<String>,
    machine: TurnMachine,
}

pub struct Conversation {
    id: String,
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn HistoryStore>,
    decoder: DecoderConfig,
    settle_delay: Duration,
    in_flight: AtomicBool,
    side_content_open: AtomicBool,
    shared: Mutex<Shared>,
    cancel: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<ChatEvent>,
}

/// How a turn's stream ended.
enum Outcome {
    Answer(CompletePayload),
    Failed(TurnFailure),
}

impl Conversation {
    /// Open the conversation named by `config.conversation.id`, loading
    /// its stored history.
    pub fn open(
        config: &Config,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn HistoryStore>,
    ) -> Result<Self, GateError> {
        let id = config.conversation.id.clone();
        let entries = store.load(&id)?;
        tracing::debug!(conversation_id = %id, entries = entries.len(), "conversation opened");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            id,
            transport,
            store,
            decoder: config.decoder.clone(),
            settle_delay: Duration::from_millis(config.conversation.settle_delay_ms),
            in_flight: AtomicBool::new(false),
            side_content_open: AtomicBool::new(false),
            shared: Mutex::new(Shared {
                history: ConversationHistory::from_entries(entries),
                session_token: None,
                machine: TurnMachine::new(),
            }),
            cancel: Mutex::new(None),
            events,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn history(&self) -> ConversationHistory {
        self.shared.lock().history.clone()
    }

    pub fn session_token(&self) -> Option<String> {
        self.shared.lock().session_token.clone()
    }

    pub fn side_content_open(&self) -> bool {
        self.side_content_open.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let shared = self.shared.lock();
        ConversationSnapshot {
            conversation_id: self.id.clone(),
            machine: shared.machine.snapshot(),
            busy: self.is_busy(),
            history_len: shared.history.len(),
            has_session: shared.session_token.is_some(),
            side_content_open: self.side_content_open(),
        }
    }

    // ── Caller operations ─────────────────────────────────────────────

    /// Submit a new user turn and drive it to completion.
    ///
    /// Rejected with [`GateError::Busy`] while another turn is in flight;
    /// the rejected query is not queued.  A turn that fails still returns
    /// `Ok`: the report carries the failure notice appended to history.
    pub async fn submit(&self, query: &str) -> Result<TurnReport, GateError> {
        let query = query.trim();
        if query.is_empty() {
            self.reject("empty query");
            return Err(GateError::EmptyQuery);
        }
        let mut guard = self.admit()?;

        let turn_id = TurnId::new();
        self.shared
            .lock()
            .history
            .push(HistoryEntry::user(turn_id, query));
        self.persist();

        Ok(self.run_turn(&mut guard, turn_id, query.to_owned()).await)
    }

    /// Re-ask a previous user turn.
    ///
    /// Every entry after that user entry is discarded, then exactly one new
    /// reply is produced for it.
    pub async fn regenerate(&self, turn_id: TurnId) -> Result<TurnReport, GateError> {
        let mut guard = self.admit()?;

        let (query, removed) = {
            let mut shared = self.shared.lock();
            let Some((_, user)) = shared.history.find_user(turn_id) else {
                return Err(GateError::UnknownTurn(turn_id));
            };
            let query = user.content.clone();
            let removed = shared
                .history
                .truncate_after_user(turn_id)
                .map_or(0, |tail| tail.len());
            (query, removed)
        };
        tracing::info!(conversation_id = %self.id, %turn_id, removed, "regenerating turn");
        self.notify(ChatEvent::HistoryTruncated { turn_id, removed });
        self.persist();

        Ok(self.run_turn(&mut guard, turn_id, query).await)
    }

    /// Discard history and the session token.  Only valid while idle.
    pub fn clear(&self) -> Result<usize, GateError> {
        let _guard = self.acquire().ok_or(GateError::NotIdle)?;

        let removed = {
            let mut shared = self.shared.lock();
            shared.session_token = None;
            shared.machine = TurnMachine::new();
            shared.history.clear()
        };
        tracing::info!(conversation_id = %self.id, removed, "conversation cleared");
        self.notify(ChatEvent::HistoryCleared { removed });
        self.flush()?;
        Ok(removed)
    }

    /// Flip the secondary content view.  Returns the new state.
    pub fn toggle_side_content(&self) -> bool {
        let open = !self.side_content_open.fetch_xor(true, Ordering::AcqRel);
        self.notify(ChatEvent::SideContentToggled { open });
        open
    }

    /// Cancel the in-flight turn, if any.
    pub fn cancel(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                tracing::info!(conversation_id = %self.id, "turn cancellation requested");
                true
            }
            None => false,
        }
    }

    // ── Admission ─────────────────────────────────────────────────────

    fn acquire(&self) -> Option<TurnGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TurnGuard {
                conversation: self,
                turn: None,
            })
    }

    fn admit(&self) -> Result<TurnGuard<'_>, GateError> {
        self.acquire().ok_or_else(|| {
            self.reject("busy");
            GateError::Busy
        })
    }

    fn reject(&self, reason: &str) {
        tracing::info!(conversation_id = %self.id, reason, "turn rejected");
        TraceEvent::TurnRejected {
            conversation_id: self.id.clone(),
            reason: reason.to_owned(),
        }
        .emit();
        self.notify(ChatEvent::Rejected {
            reason: reason.to_owned(),
        });
    }

    // ── Turn driver ───────────────────────────────────────────────────

    async fn run_turn(&self, guard: &mut TurnGuard<'_>, turn_id: TurnId, query: String) -> TurnReport {
        let started = Instant::now();
        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let session_id = {
            let mut shared = self.shared.lock();
            self.apply(&mut shared, MachineInput::Admit { turn_id });
            shared.session_token.clone()
        };
        guard.turn = Some((turn_id, started));

        TraceEvent::TurnAdmitted {
            conversation_id: self.id.clone(),
            turn_id: turn_id.to_string(),
            has_session: session_id.is_some(),
        }
        .emit();
        self.notify(ChatEvent::TurnStarted {
            turn_id,
            query: query.clone(),
        });
        self.notify_phase();

        let request = QueryRequest {
            user_query: query,
            session_id,
        };
        let outcome = self.drive(turn_id, &request, &token).await;

        let reply = match outcome {
            Outcome::Answer(payload) => {
                {
                    let mut shared = self.shared.lock();
                    let effects = self.apply(&mut shared, MachineInput::Terminal(payload));
                    self.carry_out(&mut shared, effects);
                }
                self.notify_phase();

                // Let the last completed step register before it disappears.
                if !self.settle_delay.is_zero() {
                    tokio::time::sleep(self.settle_delay).await;
                }
                self.settle(turn_id)
            }
            Outcome::Failed(failure) => self.fail(turn_id, failure),
        };

        guard.turn = None;
        let duration_ms = elapsed_ms(started);
        match &reply.failure {
            None => TraceEvent::TurnCompleted {
                conversation_id: self.id.clone(),
                turn_id: turn_id.to_string(),
                steps: reply.steps.len(),
                citations: reply.citations.len(),
                duration_ms,
            }
            .emit(),
            Some(failure) => TraceEvent::TurnFailed {
                conversation_id: self.id.clone(),
                turn_id: turn_id.to_string(),
                category: failure.category().to_owned(),
                duration_ms,
            }
            .emit(),
        }

        TurnReport {
            turn_id,
            reply,
            session_token: self.session_token(),
            duration_ms,
        }
    }

    /// Read the stream until a terminal frame, its end, or cancellation.
    async fn drive(&self, turn_id: TurnId, request: &QueryRequest, token: &CancellationToken) -> Outcome {
        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Outcome::Failed(TurnFailure::Cancelled),
            opened = self.transport.open(request) => match opened {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(%turn_id, error = %e, "failed to open query stream");
                    return Outcome::Failed(TurnFailure::TransportFailure { detail: e.to_string() });
                }
            },
        };

        let mut frames = frame_stream(body, &self.decoder);
        let mut progress_frames = 0usize;

        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => return Outcome::Failed(TurnFailure::Cancelled),
                item = frames.next() => item,
            };

            match item {
                Some(FrameItem::Frame { frame, .. }) => match frame {
                    EventFrame::ProcessingStep { message } => {
                        progress_frames += 1;
                        let steps = {
                            let mut shared = self.shared.lock();
                            self.apply(&mut shared, MachineInput::Progress { message });
                            shared.machine.steps().to_vec()
                        };
                        if progress_frames == 1 {
                            self.notify_phase();
                        }
                        self.notify(ChatEvent::Progress { turn_id, steps });
                    }
                    EventFrame::Complete(payload) => {
                        tracing::debug!(%turn_id, progress_frames, "terminal frame received, closing stream");
                        return Outcome::Answer(payload);
                    }
                    EventFrame::Error { message } => {
                        tracing::warn!(%turn_id, message = %message, "backend reported an error");
                        return Outcome::Failed(TurnFailure::BackendError { message });
                    }
                },
                Some(FrameItem::Ignored { .. }) | Some(FrameItem::Miss(_)) => {}
                Some(FrameItem::End { bytes_seen: 0 }) => {
                    return Outcome::Failed(TurnFailure::EmptyBody);
                }
                Some(FrameItem::End { .. }) | None => {
                    return Outcome::Failed(TurnFailure::IncompleteStream { progress_frames });
                }
                Some(FrameItem::Transport(e)) => {
                    tracing::warn!(%turn_id, error = %e, "query stream broke");
                    return Outcome::Failed(TurnFailure::TransportFailure { detail: e.to_string() });
                }
            }
        }
    }

    /// Finish a turn whose answer is built.
    fn settle(&self, turn_id: TurnId) -> BotMessage {
        let reply = {
            let mut shared = self.shared.lock();
            let effects = self.apply(&mut shared, MachineInput::Settle);
            self.carry_out(&mut shared, effects)
        };
        self.notify_phase();
        self.persist();
        let reply = reply.unwrap_or_else(|| {
            BotMessage::failure(turn_id, TurnFailure::IncompleteStream { progress_frames: 0 })
        });
        self.notify(ChatEvent::Answer {
            message: reply.clone(),
        });
        reply
    }

    /// Fail the in-flight turn and return the machine to idle.
    fn fail(&self, turn_id: TurnId, failure: TurnFailure) -> BotMessage {
        tracing::info!(%turn_id, category = failure.category(), "turn failed: {failure}");
        let reply = {
            let mut shared = self.shared.lock();
            let effects = self.apply(&mut shared, MachineInput::Fail(failure.clone()));
            let reply = self.carry_out(&mut shared, effects);
            self.apply(&mut shared, MachineInput::Reset);
            reply
        };
        self.notify_phase();
        self.persist();
        self.notify(ChatEvent::Failed { turn_id, failure: failure.clone() });
        reply.unwrap_or_else(|| BotMessage::failure(turn_id, failure))
    }

    /// Bring an abandoned turn to rest.  Runs from [`TurnGuard::drop`].
    fn abandon(&self, turn_id: TurnId, started: Instant) {
        let phase = self.shared.lock().machine.phase();
        tracing::info!(%turn_id, %phase, "turn abandoned by caller");
        match phase {
            // The answer is complete; only the settle delay was cut short.
            Phase::Finalizing => {
                self.settle(turn_id);
            }
            Phase::AwaitingFirstByte | Phase::Streaming => {
                self.fail(turn_id, TurnFailure::Cancelled);
                TraceEvent::TurnFailed {
                    conversation_id: self.id.clone(),
                    turn_id: turn_id.to_string(),
                    category: TurnFailure::Cancelled.category().to_owned(),
                    duration_ms: elapsed_ms(started),
                }
                .emit();
            }
            Phase::Failed => {
                let mut shared = self.shared.lock();
                self.apply(&mut shared, MachineInput::Reset);
            }
            Phase::Idle => {}
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────

    fn apply(&self, shared: &mut Shared, input: MachineInput) -> Vec<Effect> {
        match shared.machine.apply(input) {
            Ok(effects) => effects,
            Err(e) => {
                tracing::error!(conversation_id = %self.id, error = %e, "turn machine rejected input");
                Vec::new()
            }
        }
    }

    /// Apply effects.  Returns the reply appended to history, if any.
    fn carry_out(&self, shared: &mut Shared, effects: Vec<Effect>) -> Option<BotMessage> {
        let mut appended = None;
        for effect in effects {
            match effect {
                Effect::RetainSession(token) => {
                    if shared.session_token.is_none() {
                        shared.session_token = Some(token);
                        TraceEvent::SessionRetained {
                            conversation_id: self.id.clone(),
                        }
                        .emit();
                    } else {
                        tracing::debug!(conversation_id = %self.id, "session token already set, ignoring");
                    }
                }
                Effect::AppendHistory(message) => {
                    shared.history.push(HistoryEntry::Bot(message.clone()));
                    appended = Some(message);
                }
            }
        }
        appended
    }

    fn persist(&self) {
        if let Err(e) = self.flush() {
            tracing::warn!(conversation_id = %self.id, error = %e, "failed to persist history");
        }
    }

    fn flush(&self) -> Result<(), GateError> {
        let entries = self.shared.lock().history.entries().to_vec();
        self.store.save(&self.id, &entries)?;
        TraceEvent::HistoryFlushed {
            conversation_id: self.id.clone(),
            entries: entries.len(),
        }
        .emit();
        Ok(())
    }

    fn notify(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notify_phase(&self) {
        let (phase, typing) = {
            let shared = self.shared.lock();
            (shared.machine.phase(), shared.machine.is_typing())
        };
        self.notify(ChatEvent::PhaseChanged { phase, typing });
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admission guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the in-flight flag.  Dropping it releases the gate; if a turn was
/// still running (the caller abandoned the future) the turn is failed as
/// cancelled first.
struct TurnGuard<'a> {
    conversation: &'a Conversation,
    turn: Option<(TurnId, Instant)>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if let Some((turn_id, started)) = self.turn.take() {
            self.conversation.abandon(turn_id, started);
        }
        *self.conversation.cancel.lock() = None;
        self.conversation.in_flight.store(false, Ordering::Release);
    }
}
