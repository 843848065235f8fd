//! Channel layer: spawned interactive processes and pattern matching.
//!
//! This module handles the interactive session management, including
//! last-line prompt detection and ANSI stripping.

mod buffer;
mod expect;
mod patterns;
#[cfg(test)]
pub(crate) mod scripted;
mod shell;

pub use buffer::OutputBuffer;
pub use expect::{Expect, ExpectConfig, OutputFn};
pub use patterns::{PatternTable, PromptMatcher, first_match, last_line};
pub use shell::ShellSession;

use std::future::Future;
use std::time::Duration;

use regex::Regex;

use crate::error::{ExpectError, SessionError};

/// Interval between liveness checks while waiting for a match.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A live interactive process that can be scripted by prompt matching.
pub trait Interactive: Send {
    /// Read output until its last non-blank line matches one of `patterns`.
    ///
    /// Only output that arrives during this call is considered. When several
    /// patterns match, the one with the lowest index is reported. Returns the
    /// index and all text read.
    fn read_until_last_line_matches(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
        poll_interval: Duration,
    ) -> impl Future<Output = Result<(usize, String), ExpectError>> + Send;

    /// Send `line` followed by the session's line separator.
    fn send_line(&mut self, line: &str) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Send a bare line separator and report whether the process produced
    /// any output within `timeout`.
    fn is_responsive(&mut self, timeout: Duration) -> impl Future<Output = bool> + Send;

    /// Check whether the process has exited.
    fn is_dead(&mut self) -> bool;

    /// Terminate the process. Calling it more than once is harmless.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
