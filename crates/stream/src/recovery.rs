//! Best-effort repair of frames that fail strict JSON parsing.
//!
//! The response body is not a contract-verified protocol: log noise can
//! leak into a line, a string can lose its closing quote, a stray byte can
//! land between tokens.  Each repair strategy below runs at most once per
//! frame, in a fixed order, and the first one that produces an object with a
//! recognized `type` wins.  A frame no strategy can fix is dropped by the
//! caller; the stream itself is never aborted here.

use std::fmt;

use cs_domain::frame::{is_recognized_kind, DISCRIMINATOR_FIELDS};
use serde::Serialize;
use serde_json::Value;

/// A repair strategy, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Drop everything before the first `{`.
    PrefixTrim,
    /// Close a string the parser ran off the end of, then close any open
    /// objects/arrays.
    CloseUnterminatedString,
    /// Delete the character the parser choked on.
    ExciseStrayCharacter,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrefixTrim => "prefix_trim",
            Self::CloseUnterminatedString => "close_unterminated_string",
            Self::ExciseStrayCharacter => "excise_stray_character",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame that parsed after repair.
#[derive(Debug, Clone)]
pub struct Recovered {
    pub value: Value,
    pub kind: String,
    pub strategy: Strategy,
    /// The repaired text that parsed.
    pub text: String,
}

/// Try every strategy once, in order.  `None` means the frame is lost.
pub fn recover(raw: &str) -> Option<Recovered> {
    let mut working = raw.trim().to_string();

    // 1. Prefix trim.
    if !working.starts_with('{') {
        let start = working.find('{')?;
        working = working[start..].to_string();
        if let Some(rec) = attempt(&working, Strategy::PrefixTrim) {
            return Some(rec);
        }
    }

    let err = match serde_json::from_str::<Value>(&working) {
        Err(e) => e,
        // Valid JSON without a recognized kind: nothing left to repair.
        Ok(_) => return None,
    };

    // 2. Unterminated-string close.
    if err.is_eof() {
        let shape = scan(&working);
        if shape.in_string {
            for closed in close_unterminated(&working, &shape) {
                if let Some(rec) = attempt(&closed, Strategy::CloseUnterminatedString) {
                    return Some(rec);
                }
            }
        }
    }

    // 3. Stray-character excision.
    if err.is_syntax() {
        if let Some(offset) = error_offset(&working, err.line(), err.column()) {
            let excised = excise(&working, offset);
            if let Some(rec) = attempt(&excised, Strategy::ExciseStrayCharacter) {
                return Some(rec);
            }
        }
    }

    None
}

/// Read the discriminator of a JSON object, checking `type` then `kind`.
pub fn frame_kind(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    DISCRIMINATOR_FIELDS
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_str))
}

fn attempt(text: &str, strategy: Strategy) -> Option<Recovered> {
    let value: Value = serde_json::from_str(text).ok()?;
    let kind = frame_kind(&value)?.to_string();
    if !is_recognized_kind(&kind) {
        return None;
    }
    Some(Recovered {
        value,
        kind,
        strategy,
        text: text.to_string(),
    })
}

// ── Structural scan ───────────────────────────────────────────────────

/// Lexical state at the end of a (possibly truncated) JSON text.
#[derive(Debug, Default)]
struct Shape {
    in_string: bool,
    /// Byte offset of the opening quote of the string still open at the end.
    string_start: usize,
    /// A trailing backslash is waiting for its escaped character.
    pending_escape: bool,
    /// Open `{` / `[` in nesting order.
    open: Vec<u8>,
}

fn scan(text: &str) -> Shape {
    let mut shape = Shape::default();
    for (i, b) in text.bytes().enumerate() {
        if shape.in_string {
            if shape.pending_escape {
                shape.pending_escape = false;
                continue;
            }
            match b {
                b'\\' => shape.pending_escape = true,
                b'"' => shape.in_string = false,
                _ => {}
            }
        } else {
            match b {
                b'"' => {
                    shape.in_string = true;
                    shape.string_start = i;
                }
                b'{' | b'[' => shape.open.push(b),
                b'}' | b']' => {
                    // A stray closer that does not match stays unbalanced.
                    if shape.open.last() == Some(&opener(b)) {
                        shape.open.pop();
                    }
                }
                _ => {}
            }
        }
    }
    shape
}

fn opener(closer: u8) -> u8 {
    if closer == b'}' {
        b'{'
    } else {
        b'['
    }
}

/// Candidate repairs for a string the parser ran off the end of, in the
/// order they are tried.
///
/// 1. The quote goes in front of a trailing `}`/`]` run, for when the
///    runaway string swallowed the frame's own closing brackets
///    (`"message":"Searching}`).
/// 2. The quote goes at the very end, for when those brackets are part of
///    the string's content (`"message":"Reading [1]`).
///
/// Each candidate then closes whatever is still open.
fn close_unterminated(text: &str, shape: &Shape) -> Vec<String> {
    let mut body = text;
    if shape.pending_escape {
        body = &body[..body.len() - 1];
    }

    let content_start = shape.string_start + 1;
    let trimmed = body.trim_end_matches(|c| c == '}' || c == ']');

    let mut splits = Vec::with_capacity(2);
    if trimmed.len() >= content_start && trimmed.len() < body.len() {
        splits.push(trimmed.len());
    }
    splits.push(body.len());

    splits
        .into_iter()
        .map(|split| {
            let mut repaired = String::with_capacity(body.len() + 4);
            repaired.push_str(&body[..split]);
            repaired.push('"');
            repaired.push_str(&body[split..]);

            let after = scan(&repaired);
            for open in after.open.iter().rev() {
                repaired.push(if *open == b'{' { '}' } else { ']' });
            }
            repaired
        })
        .collect()
}

// ── Excision ──────────────────────────────────────────────────────────

/// Byte offset of the character a parse error points at.
///
/// serde_json reports a 1-based line and a column equal to the 1-based byte
/// index of the offending character within that line.
fn error_offset(text: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 || column == 0 {
        return None;
    }
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    let mut offset = line_start + column - 1;
    if offset >= text.len() {
        return None;
    }
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    Some(offset)
}

fn excise(text: &str, offset: usize) -> String {
    let width = text[offset..].chars().next().map_or(0, char::len_utf8);
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..offset]);
    out.push_str(&text[offset + width..]);
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_leading_log_noise() {
        let raw = r#"INFO 12:00:01 {"type":"processing_step","message":"Searching"}"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.strategy, Strategy::PrefixTrim);
        assert_eq!(rec.kind, "processing_step");
        assert_eq!(rec.value["message"], "Searching");
    }

    #[test]
    fn closes_string_that_swallowed_the_brace() {
        let raw = r#"{"type":"processing_step","message":"Searching}"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.strategy, Strategy::CloseUnterminatedString);
        assert_eq!(rec.text, r#"{"type":"processing_step","message":"Searching"}"#);
        assert_eq!(rec.value["message"], "Searching");
    }

    #[test]
    fn closes_truncated_string_and_object() {
        let raw = r#"{"type":"complete","response":"partial answer"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.strategy, Strategy::CloseUnterminatedString);
        assert_eq!(rec.value["response"], "partial answer");
    }

    #[test]
    fn closes_string_inside_nested_array() {
        let raw = r#"{"type":"complete","response":"ok","citation_array":[{"company_name":"Acme"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.value["citation_array"][0]["company_name"], "Acme");
    }

    #[test]
    fn keeps_closing_brace_that_belongs_to_the_message() {
        let raw = r#"{"type":"processing_step","message":"Checking {config}}"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.strategy, Strategy::CloseUnterminatedString);
        assert_eq!(rec.kind, "processing_step");
        assert_eq!(rec.value["message"], "Checking {config}}");
    }

    #[test]
    fn keeps_closing_bracket_that_belongs_to_the_message() {
        let raw = r#"{"type":"processing_step","message":"Reading [1]"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.strategy, Strategy::CloseUnterminatedString);
        assert_eq!(rec.text, r#"{"type":"processing_step","message":"Reading [1]"}"#);
        assert_eq!(rec.value["message"], "Reading [1]");
    }

    #[test]
    fn quote_before_brackets_is_tried_first() {
        let shape = scan(r#"{"m":"a}"#);
        assert!(shape.in_string);
        let candidates = close_unterminated(r#"{"m":"a}"#, &shape);
        assert_eq!(candidates, vec![r#"{"m":"a"}"#.to_string(), r#"{"m":"a}"}"#.to_string()]);
    }

    #[test]
    fn scan_ignores_mismatched_closer() {
        let shape = scan(r#"{"a":[1}"#);
        assert_eq!(shape.open, vec![b'{', b'[']);
        assert!(!shape.in_string);
    }

    #[test]
    fn drops_dangling_backslash_before_closing() {
        let raw = r#"{"type":"processing_step","message":"path C:\"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.value["message"], "path C:");
    }

    #[test]
    fn excises_stray_character_before_key() {
        let raw = r#"{"type":"processing_step",x"message":"Reading docs"}"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.strategy, Strategy::ExciseStrayCharacter);
        assert_eq!(rec.value["message"], "Reading docs");
    }

    #[test]
    fn excises_trailing_garbage() {
        let raw = r#"{"type":"processing_step","message":"Reading"}#"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.strategy, Strategy::ExciseStrayCharacter);
        assert_eq!(rec.value["message"], "Reading");
    }

    #[test]
    fn noise_and_stray_character_compose() {
        let raw = r#">> {"type":"processing_step",~"message":"Hi"}"#;
        // Prefix trim alone is not enough; excision runs on the trimmed text.
        let rec = recover(raw).unwrap();
        assert_eq!(rec.strategy, Strategy::ExciseStrayCharacter);
        assert_eq!(rec.value["message"], "Hi");
    }

    #[test]
    fn unrecognized_kind_is_not_recovered() {
        let raw = r#"{"type":"heartbeat","message":"tick}"#;
        assert!(recover(raw).is_none());
    }

    #[test]
    fn hopeless_input_gives_up() {
        assert!(recover("not json at all").is_none());
        assert!(recover("").is_none());
        assert!(recover(r#"{"type":"complete","response"#).is_none());
    }

    #[test]
    fn kind_alias_is_accepted() {
        let raw = r#"{"kind":"processing_step","message":"Searching}"#;
        let rec = recover(raw).unwrap();
        assert_eq!(rec.kind, "processing_step");
    }

    #[test]
    fn error_offset_handles_multibyte_prefix() {
        let text = "{\"m\":\"\u{e9}\"x}";
        // The stray `x` sits after a two-byte character.
        let offset = text.find('x').unwrap();
        assert_eq!(error_offset(text, 1, offset + 1), Some(offset));
        assert_eq!(error_offset(text, 0, 3), None);
        assert_eq!(error_offset(text, 1, text.len() + 5), None);
    }

    #[test]
    fn excise_removes_one_character() {
        assert_eq!(excise("ab\u{e9}c", 2), "abc");
        assert_eq!(excise("abc", 0), "bc");
    }
}
