//! Incremental parser for `data:`-framed server-sent events.
//!
//! Bytes arrive in arbitrary chunks; complete lines are parsed as they
//! appear and a trailing partial line is kept for the next push. The stream
//! is finished by a `data: [DONE]` line.

use serde_json::Value;

pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Data(Value),
    Done,
    /// A `data:` payload that was not valid JSON
    Error(String),
}

#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    done: bool,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        let mut items = Vec::new();
        if self.done {
            return items;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if let Some(item) = parse_line(&String::from_utf8_lossy(&line)) {
                let finished = item == StreamItem::Done;
                items.push(item);
                if finished {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        items
    }

    /// Parse whatever is left once the connection closes without a final newline
    pub fn finish(&mut self) -> Vec<StreamItem> {
        if self.done || self.buffer.is_empty() {
            return Vec::new();
        }
        self.push(b"\n")
    }
}

fn parse_line(line: &str) -> Option<StreamItem> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_MARKER {
        return Some(StreamItem::Done);
    }
    Some(match serde_json::from_str(payload) {
        Ok(value) => StreamItem::Data(value),
        Err(e) => StreamItem::Error(format!("Invalid event payload: {}", e)),
    })
}
