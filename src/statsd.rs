//! Fire-and-forget statsd emitter.
//!
//! Lines follow the plain statsd text format `<name>:<value>|<unit>` and are
//! sent as one UDP datagram each. Delivery is best-effort: send failures are
//! logged at debug level and otherwise ignored.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::gauge::GaugeSink;

/// Default statsd target when none is configured.
pub const DEFAULT_STATSD_ADDRESS: &str = "udp://127.0.0.1:8125";

/// Errors that can occur when setting up the statsd emitter.
#[derive(Error, Debug)]
pub enum StatsdError {
    #[error("Invalid statsd address '{0}': expected udp://host:port")]
    InvalidAddress(String),

    #[error("Could not resolve statsd address '{address}': {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind statsd socket: {0}")]
    Bind(#[from] std::io::Error),
}

/// Resolves a statsd address such as `udp://127.0.0.1:8125` or `localhost:8125`.
pub fn parse_statsd_address(address: &str) -> Result<SocketAddr, StatsdError> {
    let trimmed = address.trim();
    let host_port = match trimmed.split_once("://") {
        Some(("udp", rest)) => rest,
        Some(_) => return Err(StatsdError::InvalidAddress(address.to_string())),
        None => trimmed,
    };
    let host_port = host_port.trim_end_matches('/');

    if host_port.is_empty() || !host_port.contains(':') {
        return Err(StatsdError::InvalidAddress(address.to_string()));
    }

    host_port
        .to_socket_addrs()
        .map_err(|source| StatsdError::Resolve {
            address: address.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| StatsdError::InvalidAddress(address.to_string()))
}

/// Formats one statsd line. `|`, `\n` and `\r` in the name are replaced
/// since they would break the line framing.
pub fn format_line(name: &str, value: u64, unit: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| match c {
            '|' | '\n' | '\r' => '_',
            c => c,
        })
        .collect();
    format!("{}:{}|{}", name, value, unit)
}

/// UDP statsd client with a fixed name prefix.
pub struct StatsdClient {
    socket: UdpSocket,
    target: SocketAddr,
    prefix: String,
}

impl StatsdClient {
    /// Creates a client sending to `address` with every name prefixed by `prefix.`.
    pub fn new(address: &str, prefix: &str) -> Result<Self, StatsdError> {
        let target = parse_statsd_address(address)?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        info!(target = %target, prefix = %prefix, "Statsd emitter ready");

        Ok(Self {
            socket,
            target,
            prefix: prefix.trim_end_matches('.').to_string(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn qualify(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Emits a timer sample in milliseconds.
    pub fn timing(&self, name: &str, elapsed: Duration) {
        let ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        self.send(&format_line(&self.qualify(name), ms, "ms"));
    }

    /// Adds `by` to a counter.
    pub fn incr(&self, name: &str, by: u64) {
        self.send(&format_line(&self.qualify(name), by, "c"));
    }

    /// Sets a gauge.
    pub fn gauge(&self, name: &str, value: u64) {
        self.send(&format_line(&self.qualify(name), value, "g"));
    }

    fn send(&self, line: &str) {
        if let Err(e) = self.socket.send_to(line.as_bytes(), self.target) {
            debug!(target = %self.target, error = %e, line = %line, "Statsd send failed");
        }
    }
}

impl GaugeSink for StatsdClient {
    fn emit(&self, name: &str, value: u64) {
        self.gauge(name, value);
    }
}
