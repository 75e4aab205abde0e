//! Frame classification and the body → frame stream adapter.
//!
//! [`classify`] turns one raw line into a typed [`EventFrame`], routing
//! lines that fail strict parsing through the recovery strategies.
//! [`frame_stream`] wires a transport body into the [`FrameDecoder`] and
//! yields [`FrameItem`]s until the body ends or the transport fails.

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use cs_domain::config::{DecoderConfig, RecoveryMode};
use cs_domain::error::Error;
use cs_domain::frame::{
    CompletePayload, EventFrame, KIND_COMPLETE, KIND_ERROR, KIND_PROCESSING_STEP,
};
use cs_domain::stream::BoxStream;
use cs_domain::trace::TraceEvent;

use crate::decoder::FrameDecoder;
use crate::recovery::{self, Strategy};
use crate::transport::ByteStream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One frame that could not be used.  Only that frame's content is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeMiss {
    pub reason: String,
    pub raw_chars: usize,
}

/// Result of interpreting one raw frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame {
        frame: EventFrame,
        /// The strategy that repaired the frame, if it needed one.
        repair: Option<Strategy>,
    },
    /// Well-formed, but of a kind the client does not act on.
    Ignored { kind: String },
    Miss(DecodeMiss),
}

#[derive(Deserialize)]
struct StepBody {
    message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Classify a newline-delimited frame.
pub fn classify(raw: &str, mode: RecoveryMode) -> Decoded {
    let err = match serde_json::from_str::<Value>(raw) {
        Ok(value) => return interpret(value, None, raw.len()),
        Err(e) => e,
    };

    if mode == RecoveryMode::Strict {
        return miss(format!("strict parse failed: {err}"), raw);
    }

    match recovery::recover(raw) {
        Some(rec) => interpret(rec.value, Some(rec.strategy), raw.len()),
        None => miss(format!("unrecoverable frame: {err}"), raw),
    }
}

/// Classify the unterminated remainder left at end of stream.
///
/// It gets exactly one strict parse attempt: a truncated tail is never
/// repaired into something that looks like a finished answer.
pub fn classify_final(raw: &str) -> Decoded {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => interpret(value, None, raw.len()),
        Err(e) => miss(format!("unterminated final frame: {e}"), raw),
    }
}

fn interpret(value: Value, repair: Option<Strategy>, raw_chars: usize) -> Decoded {
    if !value.is_object() {
        return Decoded::Miss(DecodeMiss {
            reason: "frame is not a JSON object".into(),
            raw_chars,
        });
    }
    let Some(kind) = recovery::frame_kind(&value).map(str::to_owned) else {
        return Decoded::Miss(DecodeMiss {
            reason: "frame has no type field".into(),
            raw_chars,
        });
    };

    let frame = match kind.as_str() {
        KIND_PROCESSING_STEP => serde_json::from_value::<StepBody>(value)
            .map(|b| EventFrame::ProcessingStep { message: b.message }),
        KIND_COMPLETE => serde_json::from_value::<CompletePayload>(value).map(EventFrame::Complete),
        KIND_ERROR => serde_json::from_value::<ErrorBody>(value)
            .map(|b| EventFrame::Error { message: b.message }),
        _ => return Decoded::Ignored { kind },
    };

    match frame {
        Ok(frame) => Decoded::Frame { frame, repair },
        Err(e) => Decoded::Miss(DecodeMiss {
            reason: format!("invalid {kind} payload: {e}"),
            raw_chars,
        }),
    }
}

fn miss(reason: String, raw: &str) -> Decoded {
    Decoded::Miss(DecodeMiss {
        reason,
        raw_chars: raw.len(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Items yielded while reading one response body.
///
/// `End` and `Transport` are terminal: nothing follows them.
#[derive(Debug)]
pub enum FrameItem {
    Frame {
        frame: EventFrame,
        repair: Option<Strategy>,
    },
    Ignored { kind: String },
    Miss(DecodeMiss),
    /// The body closed normally.
    End { bytes_seen: u64 },
    /// Reading the body failed.
    Transport(Error),
}

impl From<Decoded> for FrameItem {
    fn from(decoded: Decoded) -> Self {
        match decoded {
            Decoded::Frame { frame, repair } => FrameItem::Frame { frame, repair },
            Decoded::Ignored { kind } => FrameItem::Ignored { kind },
            Decoded::Miss(m) => FrameItem::Miss(m),
        }
    }
}

/// Build a frame stream over a response body.
///
/// The stream:
/// 1. Buffers chunks and classifies every completed line
/// 2. Reports frames dropped for exceeding `max_frame_bytes` as misses
/// 3. Gives the unterminated tail one strict parse when the body closes
/// 4. Ends with exactly one `End` or `Transport` item
pub fn frame_stream(body: ByteStream, cfg: &DecoderConfig) -> BoxStream<'static, FrameItem> {
    let max_frame_bytes = cfg.max_frame_bytes;
    let mode = cfg.recovery;

    let stream = async_stream::stream! {
        let mut body = body;
        let mut decoder = FrameDecoder::new(max_frame_bytes);

        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    for raw in decoder.push(&chunk) {
                        let item = FrameItem::from(classify(&raw, mode));
                        log_item(&item, raw.len());
                        yield item;
                    }
                    for size in decoder.take_overflows() {
                        let item = FrameItem::Miss(DecodeMiss {
                            reason: "frame exceeds size limit".into(),
                            raw_chars: size,
                        });
                        log_item(&item, size);
                        yield item;
                    }
                }
                Some(Err(e)) => {
                    decoder.clear();
                    yield FrameItem::Transport(e);
                    break;
                }
                None => {
                    if let Some(raw) = decoder.finish() {
                        let item = FrameItem::from(classify_final(&raw));
                        log_item(&item, raw.len());
                        yield item;
                    }
                    yield FrameItem::End { bytes_seen: decoder.bytes_seen() };
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

fn log_item(item: &FrameItem, raw_chars: usize) {
    match item {
        FrameItem::Frame {
            frame,
            repair: Some(strategy),
        } => {
            tracing::debug!(kind = frame.kind(), %strategy, "frame recovered");
            TraceEvent::FrameRecovered {
                strategy: strategy.as_str().to_string(),
                kind: frame.kind().to_string(),
                raw_chars,
            }
            .emit();
        }
        FrameItem::Ignored { kind } => {
            tracing::debug!(kind = %kind, "ignoring unrecognized frame kind");
        }
        FrameItem::Miss(m) => {
            tracing::warn!(reason = %m.reason, raw_chars = m.raw_chars, "dropping undecodable frame");
            TraceEvent::DecodeMiss {
                reason: m.reason.clone(),
                raw_chars: m.raw_chars,
            }
            .emit();
        }
        _ => {}
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
