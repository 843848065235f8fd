//! Host port probing for forwarded guest services.
//!
//! `localhost` is checked by binding: a port is free when nothing else
//! listens on it. Any other address is checked by connecting: a port is
//! free when nothing answers there.

use std::time::Duration;

use log::debug;
use tokio::net::{TcpListener, TcpStream, lookup_host};
use tokio::time::timeout;

/// Bound on each connection attempt against a non-local address.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Whether `port` is available at `address`.
pub async fn is_port_free(port: u16, address: &str) -> bool {
    if address == "localhost" {
        return can_bind_localhost(port).await;
    }

    match timeout(CONNECT_TIMEOUT, TcpStream::connect((address, port))).await {
        Ok(Ok(_)) => false,
        Ok(Err(e)) => {
            debug!("Nothing answers on {}:{}: {}", address, port, e);
            true
        }
        Err(_) => {
            debug!("Connecting to {}:{} timed out", address, port);
            true
        }
    }
}

/// Bind every address `localhost` resolves to. Address families the host
/// lacks are skipped; a port in use on any of them is taken.
async fn can_bind_localhost(port: u16) -> bool {
    let addrs = match lookup_host(("localhost", port)).await {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("Could not resolve localhost: {}", e);
            return false;
        }
    };

    let mut bound = false;
    for addr in addrs {
        match TcpListener::bind(addr).await {
            Ok(_) => bound = true,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => return false,
            Err(e) => debug!("Cannot bind {}: {}", addr, e),
        }
    }
    bound
}

/// The first free port in `start..end`.
pub async fn find_free_port(start: u16, end: u16, address: &str) -> Option<u16> {
    for port in start..end {
        if is_port_free(port, address).await {
            return Some(port);
        }
    }
    None
}

/// Up to `count` free ports from `start..end`, lowest first.
pub async fn find_free_ports(start: u16, end: u16, count: usize, address: &str) -> Vec<u16> {
    let mut ports = Vec::with_capacity(count);
    let mut port = start;
    while port < end && ports.len() < count {
        if is_port_free(port, address).await {
            ports.push(port);
        }
        port += 1;
    }
    ports
}
