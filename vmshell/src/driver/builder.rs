//! Builder and factory for guest shell sessions and copies.

use std::time::Duration;

use log::debug;
use regex::Regex;
use secrecy::SecretString;

use super::login::{DEFAULT_LOGIN_TIMEOUT, login};
use super::transfer::{TransferTimeouts, transfer};
use crate::channel::{Expect, ExpectConfig, Interactive, ShellSession};
use crate::error::{ConfigError, Result};
use crate::logfile::LogTarget;
use crate::retry::try_wait_for;
use crate::transport::{Client, RemoteCommand};

/// Builder for [`RemoteConfig`].
///
/// # Example
///
/// ```rust,no_run
/// use vmshell::driver::RemoteBuilder;
/// use vmshell::transport::Client;
///
/// # async fn example() -> Result<(), vmshell::Error> {
/// let remote = RemoteBuilder::new("localhost")
///     .client(Client::Ssh)
///     .port(5022)
///     .username("root")
///     .password("123456")
///     .prompt(r"^\[.*\][#$]\s*$")
///     .build()?;
///
/// if let Some(mut shell) = remote.login().await? {
///     let kernel = shell.cmd_output("uname -r", std::time::Duration::from_secs(10)).await?;
///     println!("{kernel}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct RemoteBuilder {
    host: String,
    client: Client,
    port: Option<u16>,
    transfer_port: Option<u16>,
    username: Option<String>,
    password: Option<SecretString>,
    prompt: Option<String>,
    linesep: String,
    timeout: Duration,
    log: Option<LogTarget>,
}

impl RemoteBuilder {
    /// Create a new builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            client: Client::Ssh,
            port: None,
            transfer_port: None,
            username: None,
            password: None,
            prompt: None,
            linesep: "\n".to_string(),
            timeout: DEFAULT_LOGIN_TIMEOUT,
            log: None,
        }
    }

    /// Set the remote shell client (default: ssh).
    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Set the shell port (default: 22 for ssh, 23 for telnet, none for nc).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the scp port, when it differs from the shell port.
    pub fn transfer_port(mut self, port: u16) -> Self {
        self.transfer_port = Some(port);
        self
    }

    /// Set the username sent to login prompts.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password sent to password prompts.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set the shell prompt regex that marks a successful login.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Set the line separator (e.g. `"\r\n"` for serial consoles).
    pub fn linesep(mut self, linesep: impl Into<String>) -> Self {
        self.linesep = linesep.into();
        self
    }

    /// Set the per-step login timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log session output through `target`.
    pub fn log(mut self, target: LogTarget) -> Self {
        self.log = Some(target);
        self
    }

    /// Validate the settings.
    pub fn build(self) -> Result<RemoteConfig> {
        let port = match (self.port, self.client) {
            (Some(port), _) => port,
            (None, Client::Ssh) => 22,
            (None, Client::Telnet) => 23,
            (None, Client::Netcat) => {
                return Err(ConfigError::InvalidConfig {
                    message: "Port is required for nc".to_string(),
                }
                .into());
            }
        };

        let username = match (self.username, self.client) {
            (Some(username), _) => username,
            (None, Client::Netcat) => String::new(),
            (None, client) => {
                return Err(ConfigError::InvalidConfig {
                    message: format!("Username is required for {client}"),
                }
                .into());
            }
        };

        let prompt = self.prompt.ok_or_else(|| ConfigError::InvalidConfig {
            message: "Shell prompt is required".to_string(),
        })?;
        let prompt = Regex::new(&prompt).map_err(ConfigError::from)?;

        Ok(RemoteConfig {
            login_command: self.client.login_command(&self.host, port, &username),
            client: self.client,
            host: self.host,
            port,
            transfer_port: self.transfer_port.unwrap_or(port),
            username,
            password: self.password.unwrap_or_else(|| SecretString::from(String::new())),
            prompt,
            linesep: self.linesep,
            timeout: self.timeout,
            log: self.log,
        })
    }
}

/// Everything needed to open shells on, and copy files to and from, one
/// guest.
#[derive(Debug)]
pub struct RemoteConfig {
    login_command: RemoteCommand,
    client: Client,
    host: String,
    port: u16,
    transfer_port: u16,
    username: String,
    password: SecretString,
    prompt: Regex,
    linesep: String,
    timeout: Duration,
    log: Option<LogTarget>,
}

impl RemoteConfig {
    pub fn client(&self) -> Client {
        self.client
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The command `login` spawns.
    pub fn login_command(&self) -> &RemoteCommand {
        &self.login_command
    }

    /// Log into the guest.
    ///
    /// Returns `Ok(None)` when the login handshake fails; the spawned client
    /// has been closed by then. Errors are reserved for faults such as the
    /// client binary being missing.
    pub async fn login(&self) -> Result<Option<ShellSession>> {
        debug!("Trying to login with command '{}'", self.login_command);

        let config = ExpectConfig {
            linesep: self.linesep.clone(),
            ..ExpectConfig::default()
        };
        let mut session = Expect::spawn(&self.login_command, config)?;

        let handshake = match login(&mut session, &self.username, &self.password, &self.prompt, self.timeout).await {
            Ok(handshake) => handshake,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        if let Some(reason) = &handshake.failure {
            debug!("Login to {}:{} failed: {}", self.host, self.port, reason);
            session.close().await;
            return Ok(None);
        }

        if let Some(log) = &self.log {
            session.set_output_func(Some(log.output_fn()));
        }
        Ok(Some(ShellSession::new(session, self.prompt.clone())))
    }

    /// Keep trying [`login`](Self::login) until it succeeds or `total`
    /// runs out, sleeping `first` before the first attempt and `step`
    /// between attempts.
    ///
    /// Useful while a guest is still booting. Faults stop the retries.
    pub async fn wait_for_login(
        &self,
        total: Duration,
        first: Duration,
        step: Duration,
    ) -> Result<Option<ShellSession>> {
        debug!("Waiting up to {:?} for a login on {}:{}", total, self.host, self.port);
        try_wait_for(|| self.login(), total, first, step).await
    }

    /// Copy `local_path` to `remote_path` on the guest.
    ///
    /// Prompts before the password use the builder's login timeout;
    /// `transfer_timeout` bounds the copy itself.
    pub async fn copy_to(&self, local_path: &str, remote_path: &str, transfer_timeout: Duration) -> Result<bool> {
        let command =
            RemoteCommand::scp_to_remote(&self.host, self.transfer_port, &self.username, local_path, remote_path);
        remote_scp(&command, &self.password, self.log.as_ref(), self.transfer_timeouts(transfer_timeout)).await
    }

    /// Copy `remote_path` on the guest to `local_path`.
    pub async fn copy_from(&self, remote_path: &str, local_path: &str, transfer_timeout: Duration) -> Result<bool> {
        let command =
            RemoteCommand::scp_from_remote(&self.host, self.transfer_port, &self.username, remote_path, local_path);
        remote_scp(&command, &self.password, self.log.as_ref(), self.transfer_timeouts(transfer_timeout)).await
    }

    fn transfer_timeouts(&self, transfer: Duration) -> TransferTimeouts {
        TransferTimeouts {
            login: self.timeout,
            transfer,
        }
    }
}

/// Run a copy command and answer its prompts.
///
/// The copy process is always closed before returning. Returns whether the
/// copy succeeded.
pub async fn remote_scp(
    command: &RemoteCommand,
    password: &SecretString,
    log: Option<&LogTarget>,
    timeouts: TransferTimeouts,
) -> Result<bool> {
    debug!("Trying to SCP with command '{}', timeout {:?}", command, timeouts.transfer);

    let output_fn = log.map(LogTarget::output_fn);
    let mut session = Expect::spawn_with_output(command, ExpectConfig::default(), output_fn)?;

    let result = transfer(&mut session, password, timeouts).await;
    session.close().await;

    let handshake = result?;
    if let Some(reason) = &handshake.failure {
        debug!("SCP failed: {}", reason);
    }
    Ok(handshake.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::logfile::LogSink;
    use std::sync::Arc;

    /// Timeouts for fake clients that answer immediately.
    const QUICK: TransferTimeouts = TransferTimeouts {
        login: Duration::from_secs(5),
        transfer: Duration::from_secs(5),
    };

    fn sh(script: &str) -> RemoteCommand {
        RemoteCommand::new("sh").arg("-c").arg(script)
    }

    /// A config whose login spawns `sh -c script` instead of a real client.
    fn fake_remote(script: &str, log: Option<LogTarget>) -> RemoteConfig {
        RemoteConfig {
            login_command: sh(script),
            client: Client::Ssh,
            host: "guest".to_string(),
            port: 22,
            transfer_port: 22,
            username: "root".to_string(),
            password: SecretString::from("123456".to_string()),
            prompt: Regex::new(r"^\[.*\][#$]\s*$").unwrap(),
            linesep: "\n".to_string(),
            timeout: Duration::from_secs(5),
            log,
        }
    }

    fn builder() -> RemoteBuilder {
        RemoteBuilder::new("localhost")
            .username("root")
            .password("123456")
            .prompt(r"^\[.*\][#$]\s*$")
    }

    #[test]
    fn test_default_ports() {
        let ssh = builder().build().unwrap();
        assert_eq!(ssh.port(), 22);
        assert_eq!(
            ssh.login_command().to_string(),
            "ssh -o UserKnownHostsFile=/dev/null -o PreferredAuthentications=password -p 22 root@localhost"
        );

        let telnet = builder().client(Client::Telnet).build().unwrap();
        assert_eq!(telnet.login_command().to_string(), "telnet -l root localhost 23");
    }

    #[test]
    fn test_netcat_requires_port_but_not_username() {
        let err = RemoteBuilder::new("localhost")
            .client(Client::Netcat)
            .prompt("#")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidConfig { .. })));

        let nc = RemoteBuilder::new("localhost")
            .client(Client::Netcat)
            .port(12323)
            .prompt("#")
            .build()
            .unwrap();
        assert_eq!(nc.login_command().to_string(), "nc localhost 12323");
    }

    #[test]
    fn test_missing_prompt_and_bad_regex() {
        let err = RemoteBuilder::new("h").username("u").build().unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidConfig { .. })));

        let err = builder().prompt("[unclosed").build().unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidPattern(_))));
    }

    #[test]
    fn test_ssh_requires_username() {
        let err = RemoteBuilder::new("h").prompt("#").build().unwrap_err();
        assert!(err.to_string().contains("Username is required for ssh"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remote_scp_uses_exit_status() {
        let password = SecretString::from("123456".to_string());
        let ok = sh("printf 'root@guest password: '; read pw; test \"$pw\" = 123456");
        let bad = sh("printf 'root@guest password: '; read pw; exit 1");

        assert!(remote_scp(&ok, &password, None, QUICK).await.unwrap());
        assert!(!remote_scp(&bad, &password, None, QUICK).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remote_scp_with_closed_stdin_judged_by_status() {
        let password = SecretString::from("123456".to_string());
        let ok = sh("exec 0<&-; printf 'root@guest password: '; sleep 0.3; exit 0");
        let bad = sh("exec 0<&-; printf 'root@guest password: '; sleep 0.3; exit 1");

        assert!(remote_scp(&ok, &password, None, QUICK).await.unwrap());
        assert!(!remote_scp(&bad, &password, None, QUICK).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_login_with_closed_stdin_returns_none() {
        let remote = fake_remote("exec 0<&-; printf 'guest login: '; sleep 0.3; exit 1", None);

        assert!(remote.login().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_login_success_logs_session_output() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(LogSink::new(dir.path()));
        let remote = fake_remote(
            "printf 'guest login: '; read u; printf 'Password: '; read p; \
             while :; do printf '[root@guest ~]# '; read cmd || exit 0; eval \"$cmd\"; done",
            Some(LogTarget::new(sink.clone(), "guest.log")),
        );

        let mut shell = remote.login().await.unwrap().expect("login should reach the prompt");
        let output = shell.cmd_output("echo hello", Duration::from_secs(5)).await.unwrap();
        assert_eq!(output, "hello");
        shell.close().await;

        let log = std::fs::read_to_string(dir.path().join("guest.log")).unwrap();
        let format = Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}: ").unwrap();
        assert!(log.lines().all(|line| format.is_match(line)), "{log}");
        assert!(log.lines().any(|line| line.ends_with(": hello")), "{log}");
        assert!(!log.contains("Password"), "{log}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_for_login_retries_until_guest_is_up() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("attempts");
        // Refuses the first two connections, then presents a shell.
        let script = format!(
            "echo x >> '{}'; test $(wc -l < '{}') -ge 3 || {{ echo 'Connection refused'; exit 1; }}; \
             printf '[root@guest ~]# '; read cmd",
            marker.display(),
            marker.display()
        );
        let remote = fake_remote(&script, None);

        let shell = remote
            .wait_for_login(Duration::from_secs(20), Duration::ZERO, Duration::from_millis(50))
            .await
            .unwrap();

        assert!(shell.is_some());
        let attempts = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(attempts.lines().count(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_for_login_gives_up() {
        let remote = fake_remote("echo 'Connection refused'; exit 1", None);

        let shell = remote
            .wait_for_login(Duration::from_millis(300), Duration::ZERO, Duration::from_millis(50))
            .await
            .unwrap();

        assert!(shell.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_login_failure_returns_none() {
        // A "client" that refuses straight away.
        let remote = RemoteBuilder::new("localhost")
            .client(Client::Netcat)
            .port(1)
            .prompt(r"^\[.*\][#$]\s*$")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        // Whether nc exists or not, a half-open session must never come back.
        match remote.login().await {
            Ok(session) => assert!(session.is_none()),
            Err(Error::Session(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let password = SecretString::from(String::new());
        let command = RemoteCommand::new("/nonexistent/scp-binary");

        let err = remote_scp(&command, &password, None, QUICK).await.unwrap_err();
        assert!(matches!(err, Error::Session(crate::error::SessionError::SpawnFailed { .. })));
    }
}
