use log;
use std::io::{self, Write};
use xask_core::{BlockKind, StreamEvent};

const THINKING_OPEN: &str = "<THINKING>\n";
const THINKING_CLOSE: &str = "\n</THINKING>\n\n";
const SEGMENT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    Thinking,
    Text,
}

/// Writes streamed output as it arrives and keeps the answer text.
pub struct Relay<W: Write> {
    out: W,
    state: StreamState,
    segments: Vec<String>,
}

impl<W: Write> Relay<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            state: StreamState::Uninitialized,
            segments: Vec::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn transition(&mut self, next: StreamState) -> io::Result<()> {
        if self.state == next {
            return Ok(());
        }
        log::trace!("Stream state {:?} -> {:?}", self.state, next);
        match (self.state, next) {
            (StreamState::Thinking, _) => self.out.write_all(THINKING_CLOSE.as_bytes())?,
            (_, StreamState::Thinking) => self.out.write_all(THINKING_OPEN.as_bytes())?,
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    fn start_text_segment(&mut self) -> io::Result<()> {
        self.transition(StreamState::Text)?;
        if self.segments.last().is_some_and(|s| !s.is_empty()) {
            self.out.write_all(SEGMENT_SEPARATOR.as_bytes())?;
        }
        if self.segments.last().is_none_or(|s| !s.is_empty()) {
            self.segments.push(String::new());
        }
        Ok(())
    }

    pub fn handle(&mut self, event: &StreamEvent) -> io::Result<()> {
        match event {
            StreamEvent::BlockStart(BlockKind::Thinking) | StreamEvent::ThinkingDelta(_)
                if self.state == StreamState::Text =>
            {
                log::debug!("Dropping reasoning that arrived after the answer started");
            }
            StreamEvent::BlockStart(BlockKind::Thinking) => {
                self.transition(StreamState::Thinking)?;
            }
            StreamEvent::BlockStart(BlockKind::Text) => {
                self.start_text_segment()?;
            }
            StreamEvent::BlockStart(BlockKind::Other) => {
                log::debug!("Skipping non-text content block");
            }
            StreamEvent::ThinkingDelta(delta) => {
                self.transition(StreamState::Thinking)?;
                self.out.write_all(delta.as_bytes())?;
            }
            StreamEvent::TextDelta(delta) => {
                if self.state != StreamState::Text {
                    self.start_text_segment()?;
                }
                if let Some(segment) = self.segments.last_mut() {
                    segment.push_str(delta);
                }
                self.out.write_all(delta.as_bytes())?;
            }
            StreamEvent::Usage(_) => {}
            StreamEvent::Stop => {
                if self.state == StreamState::Thinking {
                    self.out.write_all(THINKING_CLOSE.as_bytes())?;
                }
                self.out.write_all(b"\n")?;
                self.state = StreamState::Uninitialized;
            }
        }
        self.out.flush()
    }

    /// Answer text blocks joined by a blank line; reasoning is not included.
    pub fn final_text(&self) -> String {
        self.segments
            .iter()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }
}
