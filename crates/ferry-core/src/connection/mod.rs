//! TCP connection utilities.
//!
//! Address parsing for `host[:port]` strings and socket tuning shared by the
//! server's accepted sockets and the client's outgoing one.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::DEFAULT_PORT;

fn invalid_host(host: &str) -> Error {
    Error::InvalidInput(format!(
        "Invalid host format '{host}'. Use HOST or HOST:PORT (e.g., 127.0.0.1 or 127.0.0.1:9000)"
    ))
}

/// Parse a host address string into a `SocketAddr`.
///
/// Accepts formats:
/// - `IP` (e.g., `192.168.1.100`) - uses default port 9000
/// - `IP:PORT` (e.g., `192.168.1.100:9001`) - uses specified port
/// - `[IPv6]` (e.g., `[::1]`) - uses default port 9000
/// - `[IPv6]:PORT` (e.g., `[::1]:9001`) - uses specified port
///
/// # Examples
///
/// ```
/// use ferry_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100").unwrap();
/// assert_eq!(addr.port(), 9000);
///
/// let addr = parse_host_address("192.168.1.100:9001").unwrap();
/// assert_eq!(addr.port(), 9001);
/// ```
///
/// # Errors
///
/// Returns an error if the host string cannot be parsed.
pub fn parse_host_address(host: &str) -> Result<SocketAddr> {
    let host = host.trim();

    if let Ok(addr) = host.parse::<SocketAddr>() {
        if addr.port() == 0 {
            return Err(invalid_port("0"));
        }
        return Ok(addr);
    }

    if host.starts_with('[') && host.ends_with(']') {
        let ip: IpAddr = host[1..host.len() - 1]
            .parse()
            .map_err(|_| invalid_host(host))?;
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Some((ip_part, port_part)) = host.rsplit_once(':') {
        if !ip_part.contains(':') {
            let ip: IpAddr = ip_part.parse().map_err(|_| invalid_host(host))?;
            let port = parse_port(port_part)?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(invalid_host(host))
}

fn parse_port(port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid_port(port)),
        Ok(port) => Ok(port),
    }
}

fn invalid_port(port: &str) -> Error {
    Error::InvalidInput(format!(
        "Invalid port '{port}'. Port must be a number between 1 and 65535"
    ))
}

/// Resolve a `host[:port]` string, falling back to DNS for host names such as
/// `localhost`.
///
/// # Errors
///
/// Returns an error if the string is malformed or the name does not resolve.
pub async fn resolve_host_address(host: &str) -> Result<SocketAddr> {
    if let Ok(addr) = parse_host_address(host) {
        return Ok(addr);
    }

    let host = host.trim();
    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') => (name, parse_port(port)?),
        _ => (host, DEFAULT_PORT),
    };
    if name.is_empty() {
        return Err(invalid_host(host));
    }

    tokio::net::lookup_host((name, port))
        .await
        .map_err(|e| Error::Connection(format!("cannot resolve '{name}': {e}")))?
        .next()
        .ok_or_else(|| Error::Connection(format!("'{name}' resolved to no addresses")))
}

/// Enable TCP keep-alive and disable Nagle on a connected socket.
///
/// Operations alternate short fields in both directions, so small writes
/// must not wait to be coalesced.
///
/// # Errors
///
/// Returns an error if the socket options cannot be set.
pub fn configure_socket(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    stream.set_nodelay(true)?;

    tracing::debug!("TCP keep-alive and nodelay enabled on socket");
    Ok(())
}
