//! Server-Sent Events decoding
//!
//! Incremental decoder for `text/event-stream` bodies. Chunks are raw bytes
//! and may split events anywhere, including inside a UTF-8 sequence or a
//! CRLF pair; complete events (terminated by a blank line) are returned as
//! they become available.

/// One decoded server event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `id:` field
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = block_end(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

/// Length of the first complete block, terminating blank line included
fn block_end(buffer: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for (i, &byte) in buffer.iter().enumerate() {
        if byte == b'\n' {
            let line = &buffer[line_start..i];
            if line.is_empty() || line == b"\r" {
                return Some(i + 1);
            }
            line_start = i + 1;
        }
    }
    None
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines = Vec::new();

    for line in block.lines() {
        // Comment / keep-alive
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}
