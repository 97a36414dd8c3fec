use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};

/// How long a sent command waits for its acknowledgement before it is sent again.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the pending table is checked for expired commands.
pub const RESEND_INTERVAL: Duration = Duration::from_millis(200);

/// Number of commands that can wait in the queue before callers block.
pub const QUEUE_CAPACITY: usize = 255;

/// How often blocked workers wake up to check whether the client is shutting down.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Settings for a [crate::Client].
///
/// The defaults match what bulbs expect; only the addresses usually need changing.
///
/// ```
/// use std::net::Ipv4Addr;
/// use lifx_client::Config;
///
/// let config = Config::default()
///     .with_local_addr(Ipv4Addr::new(192, 168, 1, 50))
///     .with_broadcast_addr(Ipv4Addr::new(192, 168, 1, 255));
/// assert_eq!(config.device_port, 56700);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind to.  Packets arriving from this address are treated as echoes of our
    /// own broadcasts and ignored.
    ///
    /// If `None`, the client binds to all interfaces and uses the first non-loopback IPv4
    /// address of the host to recognize its own echoes.
    pub local_addr: Option<Ipv4Addr>,

    /// Where probes without an explicit address go.  If `None`, this is the /24 broadcast
    /// address of the local address.
    pub broadcast_addr: Option<Ipv4Addr>,

    /// Local UDP port.
    pub bind_port: u16,

    /// UDP port commands are sent to.
    pub device_port: u16,

    pub ack_timeout: Duration,

    /// Should be shorter than `ack_timeout`.
    pub resend_interval: Duration,

    pub queue_capacity: usize,

    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            local_addr: None,
            broadcast_addr: None,
            bind_port: lifx_core::DEFAULT_PORT,
            device_port: lifx_core::DEFAULT_PORT,
            ack_timeout: ACK_TIMEOUT,
            resend_interval: RESEND_INTERVAL,
            queue_capacity: QUEUE_CAPACITY,
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl Config {
    pub fn with_local_addr(mut self, addr: Ipv4Addr) -> Config {
        self.local_addr = Some(addr);
        self
    }

    pub fn with_broadcast_addr(mut self, addr: Ipv4Addr) -> Config {
        self.broadcast_addr = Some(addr);
        self
    }

    pub fn with_bind_port(mut self, port: u16) -> Config {
        self.bind_port = port;
        self
    }

    pub fn with_device_port(mut self, port: u16) -> Config {
        self.device_port = port;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Config {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_resend_interval(mut self, interval: Duration) -> Config {
        self.resend_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Config {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Config {
        self.poll_interval = interval;
        self
    }

    pub(crate) fn bind_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(
            self.local_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
            self.bind_port,
        )
    }

    /// The address we consider our own: the configured one, or the host's.
    pub(crate) fn resolve_local_addr(&self) -> Result<Ipv4Addr> {
        match self.local_addr {
            Some(addr) => Ok(addr),
            None => host_ipv4(),
        }
    }

    pub(crate) fn resolve_broadcast_addr(&self, local: Ipv4Addr) -> Ipv4Addr {
        self.broadcast_addr.unwrap_or_else(|| broadcast_for(local))
    }
}

/// The broadcast address of the /24 network containing `addr`.
///
/// ```
/// use std::net::Ipv4Addr;
/// assert_eq!(
///     lifx_client::broadcast_for(Ipv4Addr::new(192, 168, 1, 50)),
///     Ipv4Addr::new(192, 168, 1, 255)
/// );
/// ```
pub fn broadcast_for(addr: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = addr.octets();
    Ipv4Addr::new(a, b, c, 255)
}

fn host_ipv4() -> Result<Ipv4Addr> {
    let ifaces = get_if_addrs::get_if_addrs().map_err(|e| Error::socket("list interfaces", e))?;
    for iface in ifaces {
        if iface.is_loopback() {
            continue;
        }
        if let IpAddr::V4(addr) = iface.ip() {
            debug!("Using {} ({}) as the local address", addr, iface.name);
            return Ok(addr);
        }
    }
    Err(Error::NoLocalAddress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_for() {
        assert_eq!(
            broadcast_for(Ipv4Addr::new(192, 168, 1, 50)),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(
            broadcast_for(Ipv4Addr::new(10, 0, 0, 1)),
            Ipv4Addr::new(10, 0, 0, 255)
        );
    }

    #[test]
    fn test_explicit_addresses() {
        let config = Config::default()
            .with_local_addr(Ipv4Addr::new(192, 168, 1, 50))
            .with_bind_port(0);
        let local = config.resolve_local_addr().unwrap();
        assert_eq!(local, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(
            config.resolve_broadcast_addr(local),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(config.bind_addr().to_string(), "192.168.1.50:0");

        let config = config.with_broadcast_addr(Ipv4Addr::BROADCAST);
        assert_eq!(config.resolve_broadcast_addr(local), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:56700");
        assert_eq!(config.queue_capacity, 255);
        assert!(config.resend_interval < config.ack_timeout);
    }
}
