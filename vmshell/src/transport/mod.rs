//! Remote-access client invocations.
//!
//! This module builds the external process command lines for ssh, telnet,
//! netcat and scp. Passwords never appear on a command line; they are
//! supplied interactively by the login and transfer automatons.

mod command;

pub use command::{Client, RemoteCommand};
