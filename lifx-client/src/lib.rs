//! Control LIFX bulbs on your LAN, without waiting on the network.
//!
//! [Client] queues commands and sends them from a background thread.  Every packet asks the bulb
//! for an acknowledgement; commands that aren't acknowledged in time are sent again (with the same
//! sequence number) until they are.  What the client hears back is reported through a
//! [Notifier]:
//!
//! * a `State` packet from any bulb becomes [Notifier::device_discovered]
//! * an acknowledged `SetPower` becomes [Notifier::power_changed]
//! * an acknowledged `SetColor` becomes [Notifier::color_changed]
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use lifx_client::{Callbacks, Client, Config};
//!
//! let notifier = Callbacks::new(
//!     |addr, label: &str, _power, color| {
//!         println!("{} at {}: {}", label, addr, color.describe(false))
//!     },
//!     |addr, power| println!("{} power {}", addr, power),
//!     |addr, color| println!("{} color {}", addr, color.to_hsbk().describe(true)),
//! );
//! let client = Client::new(Config::default(), notifier)?;
//! client.probe(None)?;
//! client.set_color(Ipv4Addr::new(192, 168, 1, 20), 21845, 65535, 65535, 3500, 1000)?;
//! # Ok::<(), lifx_client::Error>(())
//! ```
//!
//! Sequence numbers wrap after 255 commands.  If more than that are ever in flight at once,
//! acknowledgements can be matched to the wrong command.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod client;
mod command;
mod config;
mod error;
mod listener;
mod notify;
mod pending;
mod sender;
mod sequence;
mod sweeper;

pub use client::Client;
pub use command::{Color, Command, CommandQueue, Request};
pub use config::{
    broadcast_for, Config, ACK_TIMEOUT, POLL_INTERVAL, QUEUE_CAPACITY, RESEND_INTERVAL,
};
pub use error::{Error, Result};
pub use listener::{Handled, Rejected};
pub use notify::{Callbacks, Event, Notifier};
pub use pending::{PendingCommand, PendingTable};
pub use sequence::{SequenceAllocator, SEQUENCE_BASE, SEQUENCE_COUNT};

pub use lifx_core::{PowerLevel, HSBK};

/// Locks a mutex, carrying on if a previous holder panicked.
///
/// A panic in a notifier shouldn't leave every other thread unable to touch shared state.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
