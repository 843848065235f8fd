//! Log into a guest and run a few commands.
//!
//! # Prerequisites
//!
//! - A guest reachable over ssh, telnet or nc (e.g. a KVM guest with a
//!   forwarded port)
//! - The matching client binary on `PATH`
//!
//! # Usage
//!
//! ```bash
//! cargo run --example guest_login -- --client telnet --host localhost --port 5023 --user root --password 123456
//! ```
//!
//! Session output is written to `./logs/<host>-<client>.log`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use vmshell::{Client, LogSink, LogTarget, RemoteBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug to follow the handshake)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse()?;

    let sink = Arc::new(LogSink::new("logs"));
    let log = LogTarget::new(sink.clone(), format!("{}-{}.log", args.host, args.client));

    let mut builder = RemoteBuilder::new(&args.host)
        .client(args.client)
        .password(&args.password)
        .prompt(&args.prompt)
        .timeout(Duration::from_secs(args.timeout))
        .log(log);
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(user) = &args.user {
        builder = builder.username(user);
    }
    let remote = builder.build()?;

    println!("Logging in with: {}", remote.login_command());

    let Some(mut shell) = remote.login().await? else {
        eprintln!("Could not log into {}:{}", remote.host(), remote.port());
        std::process::exit(1);
    };
    println!("Logged in!");

    let timeout = Duration::from_secs(args.timeout);
    for command in ["uname -r", "uptime", "false"] {
        let (status, output) = shell.cmd_status_output(command, timeout).await?;
        println!("{}", "-".repeat(50));
        println!("$ {command}  (exit status {status})");
        println!("{output}");
    }

    vmshell::Interactive::close(&mut shell).await;
    sink.close_all();
    println!("Done!");

    Ok(())
}

/// Simple argument parser
struct Args {
    client: Client,
    host: String,
    port: Option<u16>,
    user: Option<String>,
    password: String,
    prompt: String,
    timeout: u64,
}

impl Args {
    fn parse() -> Result<Self, vmshell::Error> {
        let args: Vec<String> = env::args().collect();
        let mut client = Client::Ssh;
        let mut host = "localhost".to_string();
        let mut port = None;
        let mut user = None;
        let mut password = String::new();
        let mut prompt = r"^\[.*\][#$]\s*$".to_string();
        let mut timeout = 10u64;

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--client" | "-c" => {
                    if let Some(value) = value {
                        client = value.parse()?;
                    }
                    i += 1;
                }
                "--host" | "-h" => {
                    if let Some(value) = value {
                        host = value;
                    }
                    i += 1;
                }
                "--port" | "-p" => {
                    port = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                "--user" | "-u" => {
                    user = value;
                    i += 1;
                }
                "--password" | "-P" => {
                    password = value.unwrap_or_default();
                    i += 1;
                }
                "--prompt" => {
                    if let Some(value) = value {
                        prompt = value;
                    }
                    i += 1;
                }
                "--timeout" | "-t" => {
                    timeout = value.and_then(|v| v.parse().ok()).unwrap_or(10);
                    i += 1;
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                }
            }
            i += 1;
        }

        Ok(Self {
            client,
            host,
            port,
            user,
            password,
            prompt,
            timeout,
        })
    }

    fn print_help() {
        println!(
            r#"vmshell guest_login example

USAGE:
    cargo run --example guest_login -- [OPTIONS]

OPTIONS:
    -c, --client <NAME>      ssh, telnet or nc [default: ssh]
    -h, --host <HOST>        Guest address [default: localhost]
    -p, --port <PORT>        Port [default: 22 for ssh, 23 for telnet; required for nc]
    -u, --user <USER>        Username (not needed for nc)
    -P, --password <PASS>    Password
    --prompt <REGEX>         Shell prompt regex [default: ^\[.*\][#$]\s*$]
    -t, --timeout <SECS>     Per-step timeout [default: 10]
    --help                   Print this help message
"#
        );
    }
}
