//! Runtime wire protocol framing
//!
//! The Nyx runtime speaks newline-delimited JSON over its debug socket:
//! ```text
//! {"type":"event","event":"stopped","body":{"reason":"breakpoint"}}\n
//! ```
//! Reads arrive in arbitrary chunks, so the framer keeps any incomplete
//! trailing fragment until the rest of the line shows up.

use serde_json::Value;

use crate::common::{Error, Result};

use super::protocol::RuntimeCommand;

/// Longest line accepted from the runtime, matching the DAP codec limit
pub const MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

/// Incremental splitter for newline-delimited messages
#[derive(Debug)]
pub struct LineFramer {
    /// Bytes received after the last newline
    buffer: Vec<u8>,
    max_line: usize,
    /// Dropping the rest of an oversized line until its newline arrives
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_SIZE)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed a chunk and return every line it completes, in arrival order
    ///
    /// Lines are only decoded once complete, so a multi-byte character split
    /// across two reads is kept intact. Blank lines are skipped.
    ///
    /// A line longer than the limit is reported once as a
    /// [`Error::ProtocolViolation`] and dropped up to its newline; framing
    /// resumes with the next line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        let mut lines = Vec::new();
        let mut chunk = chunk;

        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    self.discarding = false;
                    chunk = &chunk[offset + 1..];
                }
                None => return lines,
            }
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut raw = &self.buffer[start..end];
            if let Some(stripped) = raw.strip_suffix(b"\r") {
                raw = stripped;
            }
            if raw.len() > self.max_line {
                lines.push(Err(self.oversized()));
            } else {
                let line = String::from_utf8_lossy(raw);
                if !line.trim().is_empty() {
                    lines.push(Ok(line.into_owned()));
                }
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line {
            tracing::warn!(bytes = self.buffer.len(), "Dropping oversized runtime line");
            lines.push(Err(self.oversized()));
            self.buffer = Vec::new();
            self.discarding = true;
        }

        lines
    }

    /// Number of bytes held back waiting for a newline
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn oversized(&self) -> Error {
        Error::ProtocolViolation(format!("line exceeds {} bytes", self.max_line))
    }
}

/// Decode one framed line as JSON
pub fn parse_line(line: &str) -> Result<Value> {
    serde_json::from_str(line).map_err(|_| Error::ProtocolViolation(line.to_string()))
}

/// Encode an outbound command as a single newline-terminated line
pub fn encode(command: &RuntimeCommand) -> Result<String> {
    let mut json = serde_json::to_string(command)?;
    json.push('\n');
    Ok(json)
}
