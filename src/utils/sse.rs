//! Incremental `text/event-stream` decoding shared by the MCP transports and
//! the stream reattachment client.

use memchr::memchr;

/// Splits a byte stream into trimmed lines. Blank lines are kept as empty
/// strings because they delimit events.
#[derive(Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = memchr(b'\n', &self.buffer[search_index..]) {
            let newline_index = search_index + relative_pos;
            let line_bytes = &self.buffer[search_index..newline_index];
            // Invalid UTF-8 lines are skipped rather than failing the stream.
            if let Ok(text) = std::str::from_utf8(line_bytes) {
                lines.push(text.trim().to_string());
            }
            search_index = newline_index + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..]) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Event type, defaulting to `message` as browsers do.
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Assembles `event:`/`data:` fields into events at each blank line.
#[derive(Default)]
pub struct SseEventParser {
    lines: SseLineBuffer,
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let lines = self.lines.push(chunk);
        self.consume(lines)
    }

    pub fn finish(&mut self) -> Vec<SseEvent> {
        let lines = self.lines.finish();
        let mut events = self.consume(lines);
        events.extend(self.dispatch());
        events
    }

    fn consume(&mut self, lines: Vec<String>) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for line in lines {
            if line.is_empty() {
                events.extend(self.dispatch());
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.trim_start()),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_handles_partial_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: one").is_empty());
        assert_eq!(buffer.push(b"\r\n\n"), vec!["data: one", ""]);
        assert!(buffer.finish().is_empty());
    }

    #[test]
    fn line_buffer_flushes_trailing_text() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: tail").is_empty());
        assert_eq!(buffer.finish(), vec!["data: tail"]);
    }

    #[test]
    fn parser_assembles_named_and_multiline_events() {
        let mut parser = SseEventParser::default();
        let mut events = parser.push(b"event: endpoint\ndata: /messages?session=1\n\n: ping\n");
        events.extend(parser.push(b"data: {\"a\":\n"));
        events.extend(parser.push(b"data: 1}\n\n"));

        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: Some("endpoint".to_string()),
                    data: "/messages?session=1".to_string(),
                },
                SseEvent {
                    event: None,
                    data: "{\"a\":\n1}".to_string(),
                },
            ]
        );
        assert_eq!(events[1].kind(), "message");
    }

    #[test]
    fn parser_drops_events_without_data() {
        let mut parser = SseEventParser::default();
        assert!(parser.push(b"event: heartbeat\n\n").is_empty());
        assert_eq!(
            parser.push(b"data: x\n\n"),
            vec![SseEvent {
                event: None,
                data: "x".to_string(),
            }]
        );
    }

    #[test]
    fn parser_dispatches_pending_event_on_finish() {
        let mut parser = SseEventParser::default();
        assert!(parser.push(b"data: last").is_empty());
        assert_eq!(parser.finish().len(), 1);
    }

    #[test]
    fn detects_event_stream_content_type() {
        assert!(is_event_stream_content_type("text/event-stream"));
        assert!(is_event_stream_content_type(
            "Text/Event-Stream; charset=UTF-8"
        ));
        assert!(is_event_stream_content_type("text/event-stream ; version=1"));
        assert!(!is_event_stream_content_type("application/json"));
    }
}
