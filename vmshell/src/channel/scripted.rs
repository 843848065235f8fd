//! In-memory [`Interactive`] session that replays scripted output.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use regex::Regex;

use super::Interactive;
use super::patterns::{first_match, last_line};
use crate::error::{ExpectError, SessionError};

/// One thing the scripted process does.
#[derive(Debug, Clone)]
pub(crate) enum Event {
    /// Print text.
    Output(String),
    /// Stay silent until the reader gives up.
    Silence,
    /// Exit with the given status.
    Exit(Option<i32>),
    /// From now on, writes to the process fail with this error.
    BreakInput(io::ErrorKind),
}

/// Replays [`Event`]s and records every line sent to it.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSession {
    events: VecDeque<Event>,
    pub sent: Vec<String>,
    pub timeouts: Vec<Duration>,
    closed: bool,
    exited: bool,
    input_error: Option<io::ErrorKind>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, text: &str) -> Self {
        self.events.push_back(Event::Output(text.to_string()));
        self
    }

    pub fn silence(mut self) -> Self {
        self.events.push_back(Event::Silence);
        self
    }

    pub fn exit(mut self, status: Option<i32>) -> Self {
        self.events.push_back(Event::Exit(status));
        self
    }

    /// The process closes its input, so later sends hit a broken pipe.
    pub fn stdin_closed(self) -> Self {
        self.input_fault(io::ErrorKind::BrokenPipe)
    }

    pub fn input_fault(mut self, kind: io::ErrorKind) -> Self {
        self.events.push_back(Event::BreakInput(kind));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Interactive for ScriptedSession {
    async fn read_until_last_line_matches(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
        _poll_interval: Duration,
    ) -> Result<(usize, String), ExpectError> {
        if self.closed {
            return Err(SessionError::Closed.into());
        }
        self.timeouts.push(timeout);

        let mut output = String::new();
        loop {
            match self.events.pop_front() {
                Some(Event::Output(text)) => {
                    output.push_str(&text);
                    if let Some(index) = first_match(patterns, last_line(&output)) {
                        return Ok((index, output));
                    }
                }
                Some(Event::BreakInput(kind)) => self.input_error = Some(kind),
                Some(Event::Exit(status)) => {
                    self.exited = true;
                    return Err(ExpectError::ProcessTerminated { output, status });
                }
                Some(Event::Silence) | None => return Err(ExpectError::Timeout { output }),
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        if self.closed || self.exited {
            return Err(SessionError::Closed);
        }
        if let Some(kind) = self.input_error {
            return Err(SessionError::Io(io::Error::from(kind)));
        }
        self.sent.push(line.to_string());
        Ok(())
    }

    async fn is_responsive(&mut self, _timeout: Duration) -> bool {
        !self.closed && !self.exited
    }

    fn is_dead(&mut self) -> bool {
        self.closed || self.exited
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
