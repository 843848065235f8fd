//! The read/respond loop shared by the login and transfer automatons.
//!
//! An automaton is a pure state machine: it is told which prompt matched and
//! answers with a [`Step`]. [`drive`] owns all I/O: it reads with the
//! automaton's current timeout, sends replies, and turns read failures into
//! terminal outcomes.

use std::fmt;
use std::time::{Duration, Instant};

use log::debug;
use secrecy::{ExposeSecret, SecretString};

use super::handshake::{FailureReason, Handshake};
use crate::channel::{DEFAULT_POLL_INTERVAL, Interactive, PatternTable};
use crate::error::{ExpectError, Result};

/// A line the automaton wants sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// The literal line `yes`.
    Yes,
    /// The username.
    Username,
    /// The password.
    Password,
}

/// What to do after a prompt matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send a reply, then keep reading.
    Reply(Reply),
    /// Keep reading without sending anything.
    Wait,
    /// Stop. `None` is success.
    Done(Option<FailureReason>),
}

/// A handshake state machine driven by [`drive`].
pub trait Automaton {
    /// Role tag of the patterns this automaton reacts to.
    type Prompt: Copy + fmt::Debug + Send + Sync;

    /// Timeout for the next read.
    fn timeout(&self) -> Duration;

    /// React to a matched prompt.
    fn on_match(&mut self, prompt: Self::Prompt) -> Step;

    /// Outcome when the process exits before a terminal prompt. `None` is
    /// success.
    fn on_terminated(&self, status: Option<i32>) -> Option<FailureReason>;
}

/// Credentials sent in reply to prompts.
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a SecretString,
}

impl Credentials<'_> {
    fn reply_text(&self, reply: Reply) -> &str {
        match reply {
            Reply::Yes => "yes",
            Reply::Username => self.username,
            Reply::Password => self.password.expose_secret(),
        }
    }
}

/// Run `automaton` against `session` until it reaches a terminal state.
///
/// Negative outcomes are reported in the returned [`Handshake`]; only
/// faults of the session itself are errors. The session is never closed
/// here.
pub async fn drive<S, A>(
    session: &mut S,
    table: &PatternTable<A::Prompt>,
    automaton: &mut A,
    credentials: &Credentials<'_>,
) -> Result<Handshake>
where
    S: Interactive,
    A: Automaton + Send,
{
    let start = Instant::now();

    loop {
        let read = session
            .read_until_last_line_matches(table.matchers(), automaton.timeout(), DEFAULT_POLL_INTERVAL)
            .await;

        let (index, text) = match read {
            Ok(found) => found,
            Err(ExpectError::Timeout { output }) => {
                debug!("Timeout elapsed (output so far: {:?})", output);
                return Ok(Handshake::failed(output, start.elapsed(), FailureReason::Timeout));
            }
            Err(ExpectError::ProcessTerminated { output, status }) => {
                debug!("Process terminated with status {:?} (output so far: {:?})", status, output);
                return Ok(match automaton.on_terminated(status) {
                    None => Handshake::success(output, start.elapsed()),
                    Some(reason) => Handshake::failed(output, start.elapsed(), reason),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let prompt = table
            .role(index)
            .ok_or(ExpectError::UnknownMatch { index })?;

        match automaton.on_match(prompt) {
            Step::Reply(reply) => {
                if let Err(e) = session.send_line(credentials.reply_text(reply)).await {
                    if !e.is_disconnect() {
                        return Err(e.into());
                    }
                    // The next read reports the exit and its status.
                    debug!("Client stopped reading its terminal: {}", e);
                }
            }
            Step::Wait => {}
            Step::Done(None) => return Ok(Handshake::success(text, start.elapsed())),
            Step::Done(Some(reason)) => {
                return Ok(Handshake::failed(text, start.elapsed(), reason));
            }
        }
    }
}
