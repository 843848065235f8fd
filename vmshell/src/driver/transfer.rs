//! Password handshake for one-shot scp copies.
//!
//! Unlike login, the copy tool exiting is the normal way a transfer ends, so
//! process termination is success when the exit status is zero.

use std::time::Duration;

use log::debug;
use secrecy::SecretString;

use super::engine::{Automaton, Credentials, Reply, Step, drive};
use super::handshake::{FailureReason, Handshake};
use super::login::DEFAULT_LOGIN_TIMEOUT;
use crate::channel::{Interactive, PatternTable};
use crate::error::{ConfigError, Result};

/// Default time allowed for a copy to finish.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// The two bounds of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTimeouts {
    /// Bound on each step until the password has been sent.
    pub login: Duration,

    /// Bound on the copy itself, from the password on.
    pub transfer: Duration,
}

impl Default for TransferTimeouts {
    fn default() -> Self {
        Self {
            login: DEFAULT_LOGIN_TIMEOUT,
            transfer: DEFAULT_TRANSFER_TIMEOUT,
        }
    }
}

/// Prompts recognised during a transfer, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPrompt {
    Confirm,
    Password,
    LostConnection,
}

/// Build the transfer pattern table.
pub fn transfer_patterns() -> std::result::Result<PatternTable<TransferPrompt>, regex::Error> {
    PatternTable::new()
        .with(r"[Aa]re you sure", TransferPrompt::Confirm)?
        .with(r"[Pp]assword:\s*$", TransferPrompt::Password)?
        .with(r"lost connection", TransferPrompt::LostConnection)
}

/// State of one transfer run.
///
/// Reads use the login timeout until the password has been sent and the
/// transfer timeout from then on.
#[derive(Debug, Clone)]
pub struct TransferRun {
    timeout: Duration,
    transfer_timeout: Duration,
    password_sent: u8,
}

impl TransferRun {
    pub fn new(timeouts: TransferTimeouts) -> Self {
        Self {
            timeout: timeouts.login,
            transfer_timeout: timeouts.transfer,
            password_sent: 0,
        }
    }
}

impl Automaton for TransferRun {
    type Prompt = TransferPrompt;

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn on_match(&mut self, prompt: TransferPrompt) -> Step {
        match prompt {
            TransferPrompt::Confirm => {
                debug!("Got 'Are you sure...'; sending 'yes'");
                Step::Reply(Reply::Yes)
            }
            TransferPrompt::Password if self.password_sent == 0 => {
                debug!("Got password prompt; sending password");
                self.password_sent += 1;
                self.timeout = self.transfer_timeout;
                Step::Reply(Reply::Password)
            }
            TransferPrompt::Password => {
                debug!("Got password prompt again");
                Step::Done(Some(FailureReason::PasswordRejected))
            }
            TransferPrompt::LostConnection => {
                debug!("Got 'lost connection'");
                Step::Done(Some(FailureReason::LostConnection))
            }
        }
    }

    fn on_terminated(&self, status: Option<i32>) -> Option<FailureReason> {
        debug!("SCP process terminated with status {:?}", status);
        match status {
            Some(0) => None,
            status => Some(FailureReason::ProcessTerminated { status }),
        }
    }
}

/// Drive a copy command running in `session` to completion.
pub async fn transfer<S: Interactive>(
    session: &mut S,
    password: &SecretString,
    timeouts: TransferTimeouts,
) -> Result<Handshake> {
    let table = transfer_patterns().map_err(ConfigError::from)?;
    let mut run = TransferRun::new(timeouts);
    let credentials = Credentials {
        username: "",
        password,
    };
    drive(session, &table, &mut run, &credentials).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::scripted::ScriptedSession;

    const LOGIN: Duration = Duration::from_secs(10);
    const TRANSFER: Duration = Duration::from_secs(600);

    const TIMEOUTS: TransferTimeouts = TransferTimeouts {
        login: LOGIN,
        transfer: TRANSFER,
    };

    async fn copy(session: &mut ScriptedSession) -> Handshake {
        let password = SecretString::from("123456".to_string());
        transfer(session, &password, TIMEOUTS).await.unwrap()
    }

    #[tokio::test]
    async fn test_clean_exit_is_success() {
        let mut session = ScriptedSession::new()
            .output("Are you sure you want to continue connecting (yes/no)? ")
            .output("root@localhost's password: ")
            .output("Sending file modes: C0644 1024 autotest.tar.bz2\n")
            .exit(Some(0));

        let handshake = copy(&mut session).await;

        assert!(handshake.is_success());
        assert_eq!(session.sent, vec!["yes", "123456"]);
        // Login timeout until the password went out, transfer timeout after.
        assert_eq!(session.timeouts, vec![LOGIN, LOGIN, TRANSFER]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let mut session = ScriptedSession::new()
            .output("root@localhost's password: ")
            .output("scp: /nonexistent: No such file or directory\n")
            .exit(Some(1));

        let handshake = copy(&mut session).await;

        assert_eq!(
            handshake.failure,
            Some(FailureReason::ProcessTerminated { status: Some(1) })
        );
    }

    #[tokio::test]
    async fn test_killed_by_signal_is_failure() {
        let mut session = ScriptedSession::new().exit(None);

        let handshake = copy(&mut session).await;
        assert!(!handshake.is_success());
    }

    #[tokio::test]
    async fn test_lost_connection() {
        let mut session = ScriptedSession::new()
            .output("root@localhost's password: ")
            .output("debug1: channel 0: free\nlost connection\n");

        let handshake = copy(&mut session).await;

        assert_eq!(handshake.failure, Some(FailureReason::LostConnection));
    }

    #[tokio::test]
    async fn test_repeated_password() {
        let mut session = ScriptedSession::new()
            .output("root@localhost's password: ")
            .output("Permission denied, please try again.\nroot@localhost's password: ");

        let handshake = copy(&mut session).await;

        assert_eq!(handshake.failure, Some(FailureReason::PasswordRejected));
        assert_eq!(session.sent, vec!["123456"]);
    }

    #[tokio::test]
    async fn test_closed_input_defers_to_exit_status() {
        let mut clean = ScriptedSession::new()
            .stdin_closed()
            .output("root@localhost's password: ")
            .exit(Some(0));
        let handshake = copy(&mut clean).await;
        assert!(handshake.is_success());
        assert!(clean.sent.is_empty());

        let mut failed = ScriptedSession::new()
            .stdin_closed()
            .output("root@localhost's password: ")
            .exit(Some(1));
        let handshake = copy(&mut failed).await;
        assert_eq!(
            handshake.failure,
            Some(FailureReason::ProcessTerminated { status: Some(1) })
        );
    }

    #[tokio::test]
    async fn test_other_send_errors_are_faults() {
        let mut session = ScriptedSession::new()
            .input_fault(std::io::ErrorKind::PermissionDenied)
            .output("root@localhost's password: ");

        let password = SecretString::from("123456".to_string());
        let result = transfer(&mut session, &password, TIMEOUTS).await;

        assert!(matches!(result, Err(crate::Error::Session(_))));
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = TransferTimeouts::default();
        assert_eq!(timeouts.login, Duration::from_secs(10));
        assert_eq!(timeouts.transfer, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_timeout_before_password() {
        let mut session = ScriptedSession::new().silence();

        let handshake = copy(&mut session).await;

        assert_eq!(handshake.failure, Some(FailureReason::Timeout));
        assert_eq!(session.timeouts, vec![LOGIN]);
    }
}
