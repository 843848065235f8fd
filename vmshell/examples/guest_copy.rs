//! Copy a file to a guest with scp and back again.
//!
//! # Prerequisites
//!
//! - A guest running sshd (e.g. a KVM guest with `hostfwd=tcp::5022-:22`)
//! - `scp` on `PATH`
//!
//! # Usage
//!
//! ```bash
//! cargo run --example guest_copy -- --host localhost --port 5022 --user root --password 123456 /etc/hostname /tmp/
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use vmshell::driver::DEFAULT_TRANSFER_TIMEOUT;
use vmshell::{LogSink, LogTarget, RemoteBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let (Some(local), Some(remote_dir)) = (args.paths.first(), args.paths.get(1)) else {
        Args::print_help();
        std::process::exit(2);
    };

    let sink = Arc::new(LogSink::new("logs"));
    let remote = RemoteBuilder::new(&args.host)
        .port(args.port)
        .username(&args.user)
        .password(&args.password)
        // Copies never wait for a shell prompt.
        .prompt(r"[#$]\s*$")
        .log(LogTarget::new(sink.clone(), "scp.log"))
        .build()?;

    let transfer_timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TRANSFER_TIMEOUT);

    println!("Copying {} to {}:{}...", local, args.host, remote_dir);
    if !remote.copy_to(local, remote_dir, transfer_timeout).await? {
        eprintln!("Upload failed, see logs/scp.log");
        std::process::exit(1);
    }

    let file_name = local.rsplit('/').next().unwrap_or(local.as_str());
    let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), file_name);
    let local_copy = format!("{local}.roundtrip");

    println!("Copying {} back to {}...", remote_path, local_copy);
    if !remote.copy_from(&remote_path, &local_copy, transfer_timeout).await? {
        eprintln!("Download failed, see logs/scp.log");
        std::process::exit(1);
    }

    sink.close_all();
    println!("Done!");
    Ok(())
}

/// Simple argument parser
struct Args {
    host: String,
    port: u16,
    user: String,
    password: String,
    timeout: Option<u64>,
    paths: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut host = "localhost".to_string();
        let mut port = 22u16;
        let mut user = "root".to_string();
        let mut password = String::new();
        let mut timeout = None;
        let mut paths = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    i += 1;
                    if i < args.len() {
                        host = args[i].clone();
                    }
                }
                "--port" | "-p" => {
                    i += 1;
                    if i < args.len() {
                        port = args[i].parse().unwrap_or(22);
                    }
                }
                "--user" | "-u" => {
                    i += 1;
                    if i < args.len() {
                        user = args[i].clone();
                    }
                }
                "--password" | "-P" => {
                    i += 1;
                    if i < args.len() {
                        password = args[i].clone();
                    }
                }
                "--timeout" | "-t" => {
                    i += 1;
                    if i < args.len() {
                        timeout = args[i].parse().ok();
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                path => paths.push(path.to_string()),
            }
            i += 1;
        }

        Self {
            host,
            port,
            user,
            password,
            timeout,
            paths,
        }
    }

    fn print_help() {
        println!(
            r#"vmshell guest_copy example

USAGE:
    cargo run --example guest_copy -- [OPTIONS] <LOCAL_FILE> <REMOTE_DIR>

OPTIONS:
    -h, --host <HOST>        Guest address [default: localhost]
    -p, --port <PORT>        SSH port [default: 22]
    -u, --user <USER>        Username [default: root]
    -P, --password <PASS>    Password
    -t, --timeout <SECS>     Transfer timeout [default: 600]
    --help                   Print this help message
"#
        );
    }
}
