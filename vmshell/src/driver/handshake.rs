//! Result type for login and transfer handshakes.

use std::fmt;
use std::time::Duration;

/// Why a handshake ended without success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The password prompt came back after the password was sent.
    PasswordRejected,

    /// The username prompt came back after the username was sent.
    UsernameRejected,

    /// The client reported that the connection was closed.
    ConnectionClosed,

    /// The client reported that the connection was refused.
    ConnectionRefused,

    /// The copy tool reported a lost connection.
    LostConnection,

    /// No expected prompt appeared before the step timeout.
    Timeout,

    /// The client process exited before a terminal prompt.
    ProcessTerminated { status: Option<i32> },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::PasswordRejected => write!(f, "got password prompt again"),
            FailureReason::UsernameRejected => write!(f, "got username prompt again"),
            FailureReason::ConnectionClosed => write!(f, "connection closed"),
            FailureReason::ConnectionRefused => write!(f, "connection refused"),
            FailureReason::LostConnection => write!(f, "lost connection"),
            FailureReason::Timeout => write!(f, "timeout elapsed"),
            FailureReason::ProcessTerminated { status: Some(code) } => {
                write!(f, "process terminated with status {code}")
            }
            FailureReason::ProcessTerminated { status: None } => {
                write!(f, "process terminated by signal")
            }
        }
    }
}

/// Outcome of a login or transfer handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The text read by the last pattern-matching step.
    pub output: String,

    /// Time taken by the whole handshake.
    pub elapsed: Duration,

    /// Why the handshake failed, if it did.
    pub failure: Option<FailureReason>,
}

impl Handshake {
    /// Create a successful handshake.
    pub fn success(output: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            output: output.into(),
            elapsed,
            failure: None,
        }
    }

    /// Create a failed handshake.
    pub fn failed(output: impl Into<String>, elapsed: Duration, reason: FailureReason) -> Self {
        Self {
            output: output.into(),
            elapsed,
            failure: Some(reason),
        }
    }

    /// Check if the handshake reached its success state.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            None => write!(f, "succeeded after {:?}", self.elapsed),
            Some(reason) => write!(f, "failed after {:?}: {}", self.elapsed, reason),
        }
    }
}
