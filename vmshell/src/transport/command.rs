//! Command lines for remote shell and copy clients.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// Options shared by every ssh and scp invocation: never persist guest host
/// keys, and only ever authenticate with a password.
const NO_KNOWN_HOSTS: [&str; 2] = ["-o", "UserKnownHostsFile=/dev/null"];
const PASSWORD_AUTH: [&str; 2] = ["-o", "PreferredAuthentications=password"];

/// Remote shell client used to reach a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Client {
    /// OpenSSH client with password authentication.
    #[serde(rename = "ssh")]
    Ssh,

    /// Telnet with the username passed on the command line.
    #[serde(rename = "telnet")]
    Telnet,

    /// Raw socket. No credentials are exchanged at this layer.
    #[serde(rename = "nc")]
    Netcat,
}

impl Client {
    /// The name used in test configurations.
    pub fn as_str(&self) -> &'static str {
        match self {
            Client::Ssh => "ssh",
            Client::Telnet => "telnet",
            Client::Netcat => "nc",
        }
    }

    /// Build the command that opens an interactive session to `host:port`.
    pub fn login_command(&self, host: &str, port: u16, username: &str) -> RemoteCommand {
        match self {
            Client::Ssh => RemoteCommand::new("ssh")
                .args(NO_KNOWN_HOSTS)
                .args(PASSWORD_AUTH)
                .arg("-p")
                .arg(port.to_string())
                .arg(format!("{username}@{host}")),
            Client::Telnet => RemoteCommand::new("telnet")
                .arg("-l")
                .arg(username)
                .arg(host)
                .arg(port.to_string()),
            Client::Netcat => RemoteCommand::new("nc").arg(host).arg(port.to_string()),
        }
    }
}

impl FromStr for Client {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh" => Ok(Client::Ssh),
            "telnet" => Ok(Client::Telnet),
            "nc" => Ok(Client::Netcat),
            other => Err(ConfigError::UnsupportedClient {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A program and its arguments, spawned directly without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
}

impl RemoteCommand {
    /// Start a command line for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Recursive copy of `local_path` to `remote_path` on the guest.
    pub fn scp_to_remote(host: &str, port: u16, username: &str, local_path: &str, remote_path: &str) -> Self {
        Self::scp_base(port)
            .arg(local_path)
            .arg(format!("{username}@{host}:{remote_path}"))
    }

    /// Recursive copy of `remote_path` on the guest to `local_path`.
    pub fn scp_from_remote(host: &str, port: u16, username: &str, remote_path: &str, local_path: &str) -> Self {
        Self::scp_base(port)
            .arg(format!("{username}@{host}:{remote_path}"))
            .arg(local_path)
    }

    fn scp_base(port: u16) -> Self {
        RemoteCommand::new("scp")
            .arg("-v")
            .args(NO_KNOWN_HOSTS)
            .args(PASSWORD_AUTH)
            .arg("-r")
            .arg("-P")
            .arg(port.to_string())
    }

    /// The program to execute.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments, in order.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
