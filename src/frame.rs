//! SSE frame accumulation from raw byte chunks.
//!
//! The backend delivers UTF-8 text in arbitrarily sized chunks; chunk
//! boundaries do not align with line boundaries (or even with UTF-8
//! character boundaries). The parser carries incomplete trailing bytes
//! across `feed` calls and only decodes complete lines, so splitting the
//! input at any byte offset produces the same frame sequence.
//!
//! Framing rules:
//! - lines are delimited by `\n`; a trailing `\r` is stripped
//! - `data:` lines contribute to the current frame: the prefix is stripped,
//!   then exactly one leading space if present (not all leading whitespace)
//! - a blank line flushes the accumulated data lines, joined with `\n`
//! - every other line (`event:`, `id:`, `retry:`, `:` comments) is ignored
//!   and does not break accumulation

/// Stateful frame parser: raw chunks in, frame payload strings out.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Bytes of the incomplete trailing line, carried between chunks.
    carry: Vec<u8>,
    /// Accumulated data lines of the in-progress frame.
    data_lines: Vec<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the incoming stream, returning zero or more complete
    /// frame payloads in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.carry.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(line.as_ref());
            if let Some(payload) = self.feed_line(line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush the pending frame at end-of-stream, if any.
    ///
    /// Catches a final payload with no trailing boundary line — notably a
    /// `[DONE]` sentinel sent without a closing blank line.
    pub fn flush(&mut self) -> Option<String> {
        if !self.carry.is_empty() {
            let tail = std::mem::take(&mut self.carry);
            let line = String::from_utf8_lossy(&tail).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if let Some(payload) = self.feed_line(&line) {
                return Some(payload);
            }
        }
        self.take_frame()
    }

    /// Apply one complete line to the accumulator. Returns a payload only
    /// when the line is a frame boundary with data pending.
    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_frame();
        }
        if let Some(rest) = line.strip_prefix("data:") {
            // Strip exactly one leading space; further whitespace is payload.
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            self.data_lines.push(rest.to_string());
        }
        None
    }

    fn take_frame(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(payload)
    }
}
