//! Newline framing for the NDJSON response body.
//!
//! Chunks arrive in order but are not aligned to frame boundaries: a frame
//! may be split anywhere, including inside a string literal or inside a
//! multi-byte UTF-8 sequence.  Bytes are therefore buffered raw and only
//! decoded as text once a full line is available.

/// Accumulates body chunks and yields complete newline-terminated frames.
///
/// The buffer holds only the unterminated suffix of the stream.  It is owned
/// exclusively by the reader of one response and never persisted.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    /// Set after an overflow: bytes are dropped up to the next newline.
    discarding: bool,
    overflows: Vec<usize>,
    bytes_seen: u64,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes: max_frame_bytes.max(1),
            discarding: false,
            overflows: Vec::new(),
            bytes_seen: 0,
        }
    }

    /// Feed one chunk and drain every frame it completes.
    ///
    /// An empty chunk yields nothing and leaves the buffer untouched.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        if chunk.is_empty() {
            return frames;
        }
        self.bytes_seen += chunk.len() as u64;

        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }

            self.buffer.extend_from_slice(line);
            let raw = std::mem::take(&mut self.buffer);
            if let Some(frame) = line_to_frame(&raw) {
                frames.push(frame);
            }
        }

        if !rest.is_empty() && !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > self.max_frame_bytes {
                tracing::warn!(
                    pending_bytes = self.buffer.len(),
                    max_frame_bytes = self.max_frame_bytes,
                    "unterminated frame exceeds size limit, discarding"
                );
                self.overflows.push(self.buffer.len());
                self.buffer.clear();
                self.discarding = true;
            }
        }

        frames
    }

    /// Flush at end of stream.
    ///
    /// A non-empty unterminated suffix is handed back once as a final
    /// candidate frame; the buffer is cleared either way.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        line_to_frame(&raw)
    }

    /// Sizes of frames dropped for exceeding the limit since the last call.
    pub fn take_overflows(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.overflows)
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes fed so far, including empty lines and dropped frames.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
        self.overflows.clear();
    }
}

fn line_to_frame(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
