use std::net::Ipv4Addr;
use std::sync::mpsc;

use lifx_core::HSBK;
use log::trace;

use crate::command::Color;

/// Receives everything the client learns about bulbs.
///
/// Called from the listener thread, so implementations should return quickly.
pub trait Notifier: Send + Sync + 'static {
    /// A bulb reported its state.
    fn device_discovered(&self, addr: Ipv4Addr, label: &str, power: u16, color: HSBK);

    /// A bulb acknowledged a power change.  `power` is the value passed to
    /// [crate::Client::set_power].
    fn power_changed(&self, addr: Ipv4Addr, power: u16);

    /// A bulb acknowledged a color change.  `color` holds the values passed to
    /// [crate::Client::set_color], before clamping.
    fn color_changed(&self, addr: Ipv4Addr, color: Color);
}

pub type DeviceCallback = Box<dyn Fn(Ipv4Addr, &str, u16, HSBK) + Send + Sync + 'static>;
pub type PowerCallback = Box<dyn Fn(Ipv4Addr, u16) + Send + Sync + 'static>;
pub type ColorCallback = Box<dyn Fn(Ipv4Addr, Color) + Send + Sync + 'static>;

/// A [Notifier] made of three closures.
pub struct Callbacks {
    device: DeviceCallback,
    power: PowerCallback,
    color: ColorCallback,
}

impl Callbacks {
    pub fn new<D, P, C>(device: D, power: P, color: C) -> Callbacks
    where
        D: Fn(Ipv4Addr, &str, u16, HSBK) + Send + Sync + 'static,
        P: Fn(Ipv4Addr, u16) + Send + Sync + 'static,
        C: Fn(Ipv4Addr, Color) + Send + Sync + 'static,
    {
        Callbacks {
            device: Box::new(device),
            power: Box::new(power),
            color: Box::new(color),
        }
    }
}

impl Notifier for Callbacks {
    fn device_discovered(&self, addr: Ipv4Addr, label: &str, power: u16, color: HSBK) {
        (self.device)(addr, label, power, color)
    }

    fn power_changed(&self, addr: Ipv4Addr, power: u16) {
        (self.power)(addr, power)
    }

    fn color_changed(&self, addr: Ipv4Addr, color: Color) {
        (self.color)(addr, color)
    }
}

/// A notification, for hosts that would rather read from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DeviceDiscovered {
        addr: Ipv4Addr,
        label: String,
        power: u16,
        color: HSBK,
    },
    PowerChanged {
        addr: Ipv4Addr,
        power: u16,
    },
    ColorChanged {
        addr: Ipv4Addr,
        color: Color,
    },
}

impl Notifier for mpsc::Sender<Event> {
    fn device_discovered(&self, addr: Ipv4Addr, label: &str, power: u16, color: HSBK) {
        publish(
            self,
            Event::DeviceDiscovered {
                addr,
                label: label.to_owned(),
                power,
                color,
            },
        )
    }

    fn power_changed(&self, addr: Ipv4Addr, power: u16) {
        publish(self, Event::PowerChanged { addr, power })
    }

    fn color_changed(&self, addr: Ipv4Addr, color: Color) {
        publish(self, Event::ColorChanged { addr, color })
    }
}

fn publish(tx: &mpsc::Sender<Event>, event: Event) {
    if let Err(mpsc::SendError(event)) = tx.send(event) {
        trace!("Nobody is listening for {:?}", event);
    }
}
