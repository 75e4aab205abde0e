use serde::Serialize;

/// Structured trace events emitted across all casestream crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnAdmitted {
        conversation_id: String,
        turn_id: String,
        has_session: bool,
    },
    TurnRejected {
        conversation_id: String,
        reason: String,
    },
    FrameRecovered {
        strategy: String,
        kind: String,
        raw_chars: usize,
    },
    DecodeMiss {
        reason: String,
        raw_chars: usize,
    },
    TurnCompleted {
        conversation_id: String,
        turn_id: String,
        steps: usize,
        citations: usize,
        duration_ms: u64,
    },
    TurnFailed {
        conversation_id: String,
        turn_id: String,
        category: String,
        duration_ms: u64,
    },
    SessionRetained {
        conversation_id: String,
    },
    HistoryFlushed {
        conversation_id: String,
        entries: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cs_event");
    }
}
