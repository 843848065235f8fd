//! Login and copy procedures for guests.
//!
//! The driver layer answers the prompts of ssh, telnet, nc and scp client
//! processes until the guest is logged in or the copy has finished.

mod builder;
mod engine;
mod handshake;
mod login;
mod transfer;

pub use builder::{RemoteBuilder, RemoteConfig, remote_scp};
pub use engine::{Automaton, Credentials, Reply, Step, drive};
pub use handshake::{FailureReason, Handshake};
pub use login::{
    DEFAULT_LOGIN_TIMEOUT, LoginPrompt, LoginRun, PLEASE_WAIT_TIMEOUT, login, login_patterns,
};
pub use transfer::{
    DEFAULT_TRANSFER_TIMEOUT, TransferPrompt, TransferRun, TransferTimeouts, transfer,
    transfer_patterns,
};
