//! # vmshell
//!
//! Async prompt-driven login and file transfer for guest VMs.
//!
//! vmshell spawns the local `ssh`, `telnet`, `nc` or `scp` client, watches
//! its output, and answers host-key confirmations, username and password
//! prompts until the guest shell prompt shows up or the copy finishes.
//!
//! ## Features
//!
//! - Login over ssh, telnet and netcat with one shared automaton
//! - scp copies in both directions, judged by the exit status
//! - Priority-ordered prompt matching on the last line of output
//! - Timestamped per-session log files
//! - Retrying logins while a guest boots, and free host port lookup
//! - Versioned environment snapshots shared between test steps
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vmshell::RemoteBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vmshell::Error> {
//!     let remote = RemoteBuilder::new("10.0.2.15")
//!         .username("root")
//!         .password("123456")
//!         .prompt(r"^\[.*\][#$]\s*$")
//!         .build()?;
//!
//!     match remote.login().await? {
//!         Some(mut shell) => {
//!             let (status, output) = shell.cmd_status_output("uname -a", Duration::from_secs(10)).await?;
//!             println!("{status}: {output}");
//!         }
//!         None => eprintln!("login failed"),
//!     }
//!
//!     let copied = remote
//!         .copy_to("/tmp/autotest.tar.bz2", "/tmp", vmshell::driver::DEFAULT_TRANSFER_TIMEOUT)
//!         .await?;
//!     println!("copied: {copied}");
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod driver;
pub mod env;
pub mod error;
pub mod logfile;
pub mod ports;
pub mod retry;
pub mod transport;

// Re-export main types for convenience
pub use channel::{Expect, Interactive, ShellSession};
pub use driver::{
    FailureReason, Handshake, RemoteBuilder, RemoteConfig, TransferTimeouts, remote_scp,
};
pub use env::{Env, EnvWarning, LoadedEnv};
pub use error::Error;
pub use logfile::{LogSink, LogTarget};
pub use ports::{find_free_port, find_free_ports, is_port_free};
pub use retry::{try_wait_for, wait_for};
pub use transport::{Client, RemoteCommand};
