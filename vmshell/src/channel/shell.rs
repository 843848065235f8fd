//! Logged-in shell session for running commands on a guest.

use std::time::Duration;

use log::debug;
use regex::Regex;

use super::expect::{Expect, OutputFn};
use super::{DEFAULT_POLL_INTERVAL, Interactive};
use crate::error::{ExpectError, SessionError};

/// Command used to query the exit status of the previous command.
const STATUS_TEST_COMMAND: &str = "echo $?";

/// An [`Expect`] session that sits at a known shell prompt.
///
/// Returned by [`RemoteConfig::login`](crate::driver::RemoteConfig::login)
/// once the login handshake has reached the prompt.
pub struct ShellSession {
    inner: Expect,
    prompt: Regex,
}

impl ShellSession {
    /// Wrap a session whose steady-state prompt matches `prompt`.
    pub fn new(inner: Expect, prompt: Regex) -> Self {
        Self { inner, prompt }
    }

    /// The shell prompt pattern.
    pub fn prompt(&self) -> &Regex {
        &self.prompt
    }

    /// The underlying process session.
    pub fn inner_mut(&mut self) -> &mut Expect {
        &mut self.inner
    }

    /// Replace the per-line output callback.
    pub fn set_output_func(&self, output_fn: Option<OutputFn>) {
        self.inner.set_output_func(output_fn);
    }

    /// Read until the last line of output is the shell prompt.
    pub async fn read_up_to_prompt(&mut self, timeout: Duration) -> Result<String, ExpectError> {
        let patterns = [self.prompt.clone()];
        let (_, text) = self
            .inner
            .read_until_last_line_matches(&patterns, timeout, DEFAULT_POLL_INTERVAL)
            .await?;
        Ok(text)
    }

    /// Send `command` and return its output without the echo and the prompt.
    pub async fn cmd_output(&mut self, command: &str, timeout: Duration) -> Result<String, ExpectError> {
        debug!("sending command: {}", command);
        self.inner.discard_pending();
        self.inner.send_line(command).await?;
        let raw = self.read_up_to_prompt(timeout).await?;
        Ok(normalize_output(&raw, command))
    }

    /// Send `command` and return its exit status together with its output.
    pub async fn cmd_status_output(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<(i32, String), ExpectError> {
        let output = self.cmd_output(command, timeout).await?;
        let status_text = self.cmd_output(STATUS_TEST_COMMAND, timeout).await?;
        let status = status_text
            .lines()
            .rev()
            .find_map(|line| line.trim().parse::<i32>().ok())
            .ok_or(ExpectError::BadStatus {
                output: status_text.clone(),
            })?;
        Ok((status, output))
    }

    /// Send `command` and return only its exit status.
    pub async fn cmd_status(&mut self, command: &str, timeout: Duration) -> Result<i32, ExpectError> {
        self.cmd_status_output(command, timeout)
            .await
            .map(|(status, _)| status)
    }
}

impl Interactive for ShellSession {
    async fn read_until_last_line_matches(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(usize, String), ExpectError> {
        self.inner
            .read_until_last_line_matches(patterns, timeout, poll_interval)
            .await
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        self.inner.send_line(line).await
    }

    async fn is_responsive(&mut self, timeout: Duration) -> bool {
        self.inner.is_responsive(timeout).await
    }

    fn is_dead(&mut self) -> bool {
        self.inner.is_dead()
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

/// Strip the command echo (first line) and the trailing prompt (last
/// non-blank line) from raw command output.
fn normalize_output(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().map(|l| l.trim_end_matches('\r')).collect();

    if lines.first().is_some_and(|first| first.trim_end().ends_with(command.trim())) {
        lines.remove(0);
    }
    if let Some(last) = lines.iter().rposition(|l| !l.trim().is_empty()) {
        lines.truncate(last);
    }

    lines.join("\n")
}
