//! Login handshake for ssh, telnet and netcat sessions.
//!
//! Answers host-key confirmation, username and password prompts until the
//! guest shows its shell prompt. Each credential is sent at most once; seeing
//! its prompt a second time means it was rejected.

use std::time::Duration;

use log::debug;
use regex::Regex;
use secrecy::SecretString;

use super::engine::{Automaton, Credentials, Reply, Step, drive};
use super::handshake::{FailureReason, Handshake};
use crate::channel::{Interactive, PatternTable};
use crate::error::Result;

/// Default per-step timeout of the login procedure.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Step timeout used once the guest has asked us to wait.
pub const PLEASE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Prompts recognised during login, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPrompt {
    /// "Are you sure you want to continue connecting"
    Confirm,
    Password,
    Username,
    ConnectionClosed,
    ConnectionRefused,
    /// "Please wait", printed by some guests while booting services.
    PleaseWait,
    /// The caller's shell prompt.
    Shell,
}

/// Build the login pattern table around the caller's shell prompt.
pub fn login_patterns(prompt: &Regex) -> std::result::Result<PatternTable<LoginPrompt>, regex::Error> {
    Ok(PatternTable::new()
        .with(r"[Aa]re you sure", LoginPrompt::Confirm)?
        .with(r"[Pp]assword:\s*$", LoginPrompt::Password)?
        .with(r"[Ll]ogin:\s*$", LoginPrompt::Username)?
        .with(r"[Cc]onnection.*closed", LoginPrompt::ConnectionClosed)?
        .with(r"[Cc]onnection.*refused", LoginPrompt::ConnectionRefused)?
        .with(r"[Pp]lease wait", LoginPrompt::PleaseWait)?
        .with_regex(prompt.clone(), LoginPrompt::Shell))
}

/// State of one login run.
#[derive(Debug, Clone)]
pub struct LoginRun {
    timeout: Duration,
    password_sent: u8,
    username_sent: u8,
}

impl LoginRun {
    /// Start a run with the given per-step timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            password_sent: 0,
            username_sent: 0,
        }
    }
}

impl Automaton for LoginRun {
    type Prompt = LoginPrompt;

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn on_match(&mut self, prompt: LoginPrompt) -> Step {
        match prompt {
            LoginPrompt::Confirm => {
                debug!("Got 'Are you sure...'; sending 'yes'");
                Step::Reply(Reply::Yes)
            }
            LoginPrompt::Password if self.password_sent == 0 => {
                debug!("Got password prompt; sending password");
                self.password_sent += 1;
                Step::Reply(Reply::Password)
            }
            LoginPrompt::Password => {
                debug!("Got password prompt again");
                Step::Done(Some(FailureReason::PasswordRejected))
            }
            LoginPrompt::Username if self.username_sent == 0 => {
                debug!("Got username prompt; sending username");
                self.username_sent += 1;
                Step::Reply(Reply::Username)
            }
            LoginPrompt::Username => {
                debug!("Got username prompt again");
                Step::Done(Some(FailureReason::UsernameRejected))
            }
            LoginPrompt::ConnectionClosed => {
                debug!("Got 'Connection closed'");
                Step::Done(Some(FailureReason::ConnectionClosed))
            }
            LoginPrompt::ConnectionRefused => {
                debug!("Got 'Connection refused'");
                Step::Done(Some(FailureReason::ConnectionRefused))
            }
            LoginPrompt::PleaseWait => {
                debug!("Got 'Please wait'");
                self.timeout = PLEASE_WAIT_TIMEOUT;
                Step::Wait
            }
            LoginPrompt::Shell => {
                debug!("Got shell prompt -- logged in");
                Step::Done(None)
            }
        }
    }

    fn on_terminated(&self, status: Option<i32>) -> Option<FailureReason> {
        // A client exiting mid-login never means we got a shell.
        Some(FailureReason::ProcessTerminated { status })
    }
}

/// Log into a guest over an already spawned `session`.
///
/// `timeout` bounds each step of the procedure (the confirmation, the
/// password prompt, the shell prompt and so on), not the whole login. On
/// success the session is left sitting at the shell prompt. The session is
/// not closed on failure.
pub async fn login<S: Interactive>(
    session: &mut S,
    username: &str,
    password: &SecretString,
    prompt: &Regex,
    timeout: Duration,
) -> Result<Handshake> {
    let table = login_patterns(prompt).map_err(crate::error::ConfigError::from)?;
    let mut run = LoginRun::new(timeout);
    let credentials = Credentials { username, password };
    drive(session, &table, &mut run, &credentials).await
}
