use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lifx_core::{Message, PowerLevel, HSBK};
use log::{debug, error, trace};
use thiserror::Error;

use crate::command::Request;
use crate::notify::Notifier;
use crate::pending::PendingTable;

const BUFFER_SIZE: usize = 1024;

/// What the listener did with a datagram it accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// A `State` packet was passed on as a discovery.
    Discovered { addr: Ipv4Addr, label: String },
    /// A `SetPower` was acknowledged.
    PowerChanged { sequence: u8 },
    /// A `SetColor` was acknowledged.
    ColorChanged { sequence: u8 },
    /// A `Get` was acknowledged.  Its answer arrives separately, as a `State` packet.
    Acknowledged { sequence: u8 },
    /// Decoded fine, but not something the client acts on.
    Ignored { typ: u16 },
}

/// Why the listener dropped a datagram.
#[derive(Debug, Error)]
pub enum Rejected {
    #[error("malformed packet: {0}")]
    Malformed(#[from] lifx_core::Error),

    #[error("echo of our own broadcast")]
    SelfOriginated,

    #[error("acknowledgement for seq={0}, which is not pending")]
    UnmatchedAck(u8),

    #[error("packet from non-IPv4 address {0}")]
    NotIpv4(SocketAddr),
}

/// Turns inbound datagrams into notifications.
pub(crate) struct Listener {
    local_addr: Ipv4Addr,
    pending: Arc<PendingTable>,
    notifier: Arc<dyn Notifier>,
}

impl Listener {
    pub(crate) fn new(
        local_addr: Ipv4Addr,
        pending: Arc<PendingTable>,
        notifier: Arc<dyn Notifier>,
    ) -> Listener {
        Listener {
            local_addr,
            pending,
            notifier,
        }
    }

    pub(crate) fn handle_datagram(
        &self,
        data: &[u8],
        src: SocketAddr,
    ) -> Result<Handled, Rejected> {
        let packet = lifx_core::decode(data)?;

        let addr = match src {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => return Err(Rejected::NotIpv4(src)),
        };
        if addr == self.local_addr {
            return Err(Rejected::SelfOriginated);
        }

        match packet.message {
            Message::Acknowledgement { seq } => {
                let entry = self.pending.resolve(seq).ok_or(Rejected::UnmatchedAck(seq))?;
                let target = entry.command.target;
                debug!(
                    "{} acknowledged seq={} ({:?})",
                    addr, seq, entry.command.request
                );
                match entry.command.request {
                    Request::SetColor { color, .. } => {
                        self.notifier.color_changed(target, color);
                        Ok(Handled::ColorChanged { sequence: seq })
                    }
                    Request::SetPower { power, .. } => {
                        self.notifier.power_changed(target, power);
                        Ok(Handled::PowerChanged { sequence: seq })
                    }
                    Request::Get => Ok(Handled::Acknowledged { sequence: seq }),
                }
            }
            Message::LightState {
                color,
                power,
                label,
                ..
            } => {
                self.discovered(addr, label.as_str(), power, color);
                Ok(Handled::Discovered {
                    addr,
                    label: label.0,
                })
            }
            other => {
                trace!("Ignoring {:?} from {}", other, addr);
                Ok(Handled::Ignored {
                    typ: other.get_num(),
                })
            }
        }
    }

    fn discovered(&self, addr: Ipv4Addr, label: &str, power: u16, color: HSBK) {
        debug!(
            "{} is {:?} ({}, {})",
            addr,
            label,
            if PowerLevel::from_raw(power).is_on() {
                "on"
            } else {
                "off"
            },
            color.describe(true)
        );
        self.notifier.device_discovered(addr, label, power, color);
    }

    /// Receives until `running` is cleared.  The socket needs a read timeout for that check to
    /// happen while the network is quiet.
    pub(crate) fn run(&self, socket: &UdpSocket, running: &AtomicBool) {
        debug!("Listener started");
        let mut buf = [0; BUFFER_SIZE];
        while running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((nbytes, src)) => match self.handle_datagram(&buf[..nbytes], src) {
                    Ok(handled) => trace!("{}: {:?}", src, handled),
                    Err(Rejected::Malformed(e)) => debug!("Dropping packet from {}: {}", src, e),
                    Err(e) => trace!("Dropping packet from {}: {}", src, e),
                },
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => error!("Socket error while receiving: {}", e),
            }
        }
        debug!("Listener stopped");
    }
}
