//! Incremental parser for `text/event-stream` bodies.

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type (from `event:`), `message` when absent.
    pub event: String,
    /// Event data (`data:` lines joined with newlines).
    pub data: String,
    /// Last event id (from `id:`).
    pub id: Option<String>,
}

impl Default for SseEvent {
    fn default() -> Self {
        Self {
            event: "message".into(),
            data: String::new(),
            id: None,
        }
    }
}

/// Parser state for an SSE stream.
///
/// Chunks may split lines and events anywhere; incomplete input is buffered
/// until the next [`SseParser::feed`].
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current: SseEvent,
    has_data: bool,
    bom_checked: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn process_line(&mut self, line: &str) {
        if line.starts_with(':') {
            // Comment / keep-alive
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.current.event = value.to_string(),
            "data" => {
                self.current.data.push_str(value);
                self.current.data.push('\n');
                self.has_data = true;
            }
            "id" if !value.contains('\0') => self.current.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let mut event = std::mem::take(&mut self.current);
        if !std::mem::take(&mut self.has_data) {
            return None;
        }
        if event.data.ends_with('\n') {
            event.data.pop();
        }
        if event.event.is_empty() {
            event.event = "message".into();
        }
        Some(event)
    }

    /// Feed a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        if !self.bom_checked && !self.buffer.is_empty() {
            self.bom_checked = true;
            if let Some(rest) = self.buffer.strip_prefix('\u{FEFF}') {
                self.buffer = rest.to_string();
            }
        }

        let mut events = Vec::new();
        let buffer = std::mem::take(&mut self.buffer);
        let mut rest = buffer.as_str();
        while let Some(pos) = rest.find('\n') {
            let line = rest[..pos].strip_suffix('\r').unwrap_or(&rest[..pos]);
            if line.is_empty() {
                events.extend(self.dispatch());
            } else {
                self.process_line(line);
            }
            rest = &rest[pos + 1..];
        }
        self.buffer = rest.to_string();
        events
    }

    /// Flush a trailing event at end of stream.
    pub fn flush(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            self.process_line(line);
        }
        self.dispatch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_then_message() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: endpoint\ndata: /messages?session_id=abc\n\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?session_id=abc");
        assert_eq!(events[1].event, "message");
        assert_eq!(events[1].data, "{\"a\":1}");
    }

    #[test]
    fn test_split_chunks_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: hel").is_empty());
        assert!(parser.feed("lo\r\ndata: world\r\n").is_empty());
        let events = parser.feed("\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello\nworld");
    }

    #[test]
    fn test_comments_and_empty_events_are_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(": ping\n\nevent: noop\n\nid: 3\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("3"));
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_flush_trailing_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed("\u{FEFF}data: tail").is_empty());
        let event = parser.flush().unwrap();
        assert_eq!(event.data, "tail");
        assert!(parser.flush().is_none());
    }
}
