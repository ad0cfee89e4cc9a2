//! Line-oriented SSE wire parser (component B)
//!
//! Consumes a byte stream and assembles `data:`/`event:`/`id:`/`retry:`
//! fields into finalized events — buffering partial lines across chunk
//! boundaries, tolerating both `\n` and `\r\n`, and flushing a trailing
//! partial event on stream end.
//!
//! Unrecognized field names are tracked in a `headers` map, and malformed
//! `retry:` values are reported as non-fatal parse faults instead of being
//! silently dropped, so callers can see every malformed line on the wire.

use std::collections::HashMap;

/// A single non-fatal parse fault: a field that could not be interpreted
///
/// Reported through `on_error`; the field is ignored and parsing continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFault {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for ParseFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed `{}` field (value {:?}): {}",
            self.field, self.value, self.reason
        )
    }
}

/// An event as assembled by the parser, before sequence/timestamp assignment
///
/// The client assigns `sequence` and `timestamp` at finalize time, so the
/// parser itself stays free of any notion of "which event number is this"
/// — it only knows about the current connection's byte stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub id: String,
    pub name: String,
    pub data: String,
    pub retry_ms: Option<u64>,
    pub raw_lines: Vec<String>,
    pub headers: HashMap<String, String>,
}

/// Result of feeding one chunk (or flushing at EOF) into the parser
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Events finalized by this call, in order
    pub events: Vec<RawEvent>,
    /// Non-fatal field faults encountered in this call, in order
    pub faults: Vec<ParseFault>,
    /// Whether any line (including a comment) was observed — used for
    /// activity stamping even when no event was finalized
    pub saw_activity: bool,
}

/// Incremental SSE parser
///
/// Feed it raw bytes as they arrive (`feed`), and flush whatever is left
/// when the stream ends (`flush`). Internal state carries across calls so
/// a field split across two TCP chunks still parses correctly.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
    current: Option<RawEvent>,
}

impl SseStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning any events finalized and any
    /// non-fatal faults found along the way
    pub fn feed(&mut self, bytes: &[u8]) -> ParseOutcome {
        let text = String::from_utf8_lossy(bytes);
        self.buffer.push_str(&text);

        let mut outcome = ParseOutcome::default();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].to_string();
            self.buffer.drain(..=newline_pos);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();

            self.process_line(&line, &mut outcome);
        }

        outcome
    }

    /// Flush a trailing partial event when the underlying stream ends
    ///
    /// A partially accumulated event with no terminating blank line is
    /// discarded, not finalized — this only drains the line buffer (in case
    /// the last line had no trailing newline) and otherwise abandons
    /// `current`.
    pub fn flush(&mut self) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if !line.is_empty() {
                self.process_line(&line, &mut outcome);
            }
        }

        self.current = None;
        outcome
    }

    fn process_line(&mut self, line: &str, outcome: &mut ParseOutcome) {
        if line.is_empty() {
            if let Some(event) = self.current.take() {
                outcome.events.push(event);
            }
            // An empty line with no accumulated event is ignored.
            return;
        }

        outcome.saw_activity = true;

        if let Some(rest) = line.strip_prefix(':') {
            let _ = rest; // comment line: counts as activity, no field mutation
            return;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let field = &line[..pos];
                let value = line[pos + 1..].strip_prefix(' ').unwrap_or(&line[pos + 1..]);
                (field, value)
            }
            None => (line, ""),
        };

        let event = self.current.get_or_insert_with(RawEvent::default);
        event.raw_lines.push(line.to_string());

        match field {
            "id" => event.id = value.to_string(),
            "event" => event.name = value.to_string(),
            "data" => {
                if !event.data.is_empty() {
                    event.data.push('\n');
                }
                event.data.push_str(value);
            }
            "retry" => match value.parse::<u64>() {
                Ok(ms) => event.retry_ms = Some(ms),
                Err(e) => outcome.faults.push(ParseFault {
                    field: "retry".to_string(),
                    value: value.to_string(),
                    reason: e.to_string(),
                }),
            },
            other => {
                event.headers.insert(other.to_string(), value.to_string());
            }
        }
    }
}
