//! Error types for vmshell.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for vmshell operations.
///
/// Expected negative outcomes of a handshake (rejected password, refused
/// connection, timeout) are not errors; they are reported through
/// [`Handshake`](crate::driver::Handshake). This type covers faults only.
#[derive(Error, Debug)]
pub enum Error {
    /// Child process / session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Pattern-matching read errors
    #[error("Expect error: {0}")]
    Expect(#[from] ExpectError),

    /// Caller configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Environment snapshot errors
    #[error("Env error: {0}")]
    Env(#[from] EnvError),
}

/// Errors from the spawned interactive process.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The process could not be started
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The pseudo-terminal could not be set up
    #[error("PTY error: {message}")]
    Pty { message: String },

    /// The session was already closed
    #[error("Session closed")]
    Closed,

    /// I/O error talking to the child
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Whether the error means the child stopped reading its terminal
    /// (closed its end or exited).
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Io(e) => {
                // EIO: every slave-side descriptor of the PTY is closed.
                matches!(
                    e.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
                ) || e.raw_os_error() == Some(EIO)
            }
            _ => false,
        }
    }
}

const EIO: i32 = 5;

/// Failure conditions of `read_until_last_line_matches`.
#[derive(Error, Debug)]
pub enum ExpectError {
    /// No pattern matched before the deadline
    #[error("Timeout expired (output so far: {output:?})")]
    Timeout { output: String },

    /// The process ended before any pattern matched
    #[error("Process terminated with status {status:?} (output so far: {output:?})")]
    ProcessTerminated { output: String, status: Option<i32> },

    /// A status query returned something that is not an exit code
    #[error("Could not parse exit status from {output:?}")]
    BadStatus { output: String },

    /// The session reported a match index with no pattern behind it
    #[error("Match index {index} is outside the pattern table")]
    UnknownMatch { index: usize },

    /// The session itself failed
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ExpectError {
    /// Output collected before the failure, if any.
    pub fn output(&self) -> &str {
        match self {
            ExpectError::Timeout { output }
            | ExpectError::ProcessTerminated { output, .. }
            | ExpectError::BadStatus { output } => output,
            ExpectError::UnknownMatch { .. } | ExpectError::Session(_) => "",
        }
    }
}

/// Errors in caller-supplied configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Remote shell client name not in {ssh, telnet, nc}
    #[error("Unknown remote shell client: '{name}'")]
    UnsupportedClient { name: String },

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Missing or inconsistent builder settings
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Environment snapshot persistence errors.
#[derive(Error, Debug)]
pub enum EnvError {
    /// Could not write the snapshot
    #[error("Failed to write env file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Could not serialize the snapshot
    #[error("Failed to serialize env: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type alias using vmshell's Error.
pub type Result<T> = std::result::Result<T, Error>;
