use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, SyncSender};

use lifx_core::{Message, PowerLevel, HSBK};

use crate::error::{Error, Result};

/// A color exactly as a caller asked for it.
///
/// Nothing is clamped until the command is encoded, so an acknowledgement reports back the same
/// values that were requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub hue: u32,
    pub saturation: u32,
    pub brightness: u32,
    pub kelvin: u32,
}

impl Color {
    pub fn new(hue: u32, saturation: u32, brightness: u32, kelvin: u32) -> Color {
        Color {
            hue,
            saturation,
            brightness,
            kelvin,
        }
    }

    /// The color a bulb will actually be sent.
    pub fn to_hsbk(self) -> HSBK {
        HSBK::clamped(self.hue, self.saturation, self.brightness, self.kelvin)
    }
}

/// What a command asks a bulb to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Ask for the light state.  The bulb answers with a `State` packet.
    Get,
    SetColor {
        color: Color,
        /// fade time, in milliseconds
        duration: u32,
    },
    SetPower {
        /// zero is off, anything else is fully on
        power: u16,
        /// fade time, in milliseconds
        duration: u32,
    },
}

impl Request {
    pub fn to_message(self) -> Message {
        match self {
            Request::Get => Message::LightGet,
            Request::SetColor { color, duration } => Message::LightSetColor {
                reserved: 0,
                color: color.to_hsbk(),
                duration,
            },
            Request::SetPower { power, duration } => Message::LightSetPower {
                level: PowerLevel::from_raw(power),
                duration,
            },
        }
    }
}

/// One outbound command, as it travels through the queue.
///
/// `sequence` is `None` until the command is first sent.  A resend carries the sequence number it
/// was first sent with.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub target: Ipv4Addr,
    pub request: Request,
    pub sequence: Option<u8>,
}

impl Command {
    pub fn new(target: Ipv4Addr, request: Request) -> Command {
        Command {
            target,
            request,
            sequence: None,
        }
    }
}

/// Producer side of the bounded command queue.
///
/// Cloned into everything that submits commands; the single consumer is the sender thread.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: SyncSender<Command>,
}

impl CommandQueue {
    /// Creates a queue holding at most `capacity` commands, returning the consumer end with it.
    pub fn bounded(capacity: usize) -> (CommandQueue, Receiver<Command>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (CommandQueue { tx }, rx)
    }

    /// Adds a command to the queue, blocking while the queue is full.
    ///
    /// Fails once the consumer has gone away.
    pub fn enqueue(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| Error::QueueClosed)
    }
}
