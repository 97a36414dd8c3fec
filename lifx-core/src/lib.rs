//! This crate provides the wire format used by `lifx-client` to talk to LIFX bulbs on the LAN.
//!
//! It only deals with bytes: building packets, packing them for the network, and unpacking the
//! datagrams that bulbs send back.  Talking to the network, tracking acknowledgements and
//! retrying lost packets is done by the higher-level `lifx-client` crate.
//!
//! # Packet layout
//!
//! Every packet starts with a fixed 36-byte header, split into three sections ([Frame],
//! [FrameAddress] and [ProtocolHeader]), followed by a payload whose shape depends on the message
//! type.  All multi-byte fields are little-endian.
//!
//! # The size field
//!
//! Packets built by this crate store `(packet length - 2) << 1` in [Frame::size].  Bulbs accept
//! this, and other clients on the network expect it, so it is reproduced exactly.  Because the
//! field can't be trusted, [RawMessage::unpack] ignores it and treats everything after the header
//! as payload.
//!
//! # Reserved fields
//! When *constructing* packets, every reserved field is set to zero.  Received packets may carry
//! non-zero reserved values; they are kept as-is so a decoded header re-packs byte-for-byte.
//!
//! # Unknown values
//! Bulbs regularly send message types that aren't documented.  These decode to
//! [Message::Unknown] with the payload left untouched, rather than failing.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;
use std::io::{Cursor, Read};
use thiserror::Error;

/// The UDP port bulbs listen on.
pub const DEFAULT_PORT: u16 = 56700;

/// Size of the packed header (frame + frame address + protocol header).
pub const HEADER_SIZE: usize = 36;

/// Protocol number carried in every frame.
pub const PROTOCOL_NUMBER: u16 = 1024;

/// Source identifier stamped on every packet we build.  Packs to the bytes `"BRKR"`.
pub const CLIENT_SOURCE: u32 = 0x524b_5242;

/// Various message encoding/decoding errors
#[derive(Error, Debug)]
pub enum Error {
    /// The datagram is shorter than the header, or than the fixed payload of its message type.
    #[error("packet truncated: needed {needed} bytes but only {available} available")]
    Truncated { needed: usize, available: usize },

    /// This error means one of the message fields contains an invalid or unsupported value.
    ///
    /// The inner string is a description of the error.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

trait LifxFrom<T>: Sized {
    fn lifx_from(val: T) -> Result<Self, Error>;
}

macro_rules! derive_lifx_from {
{ $( $t:ty ),*} => {
    $(
        impl LifxFrom<$t> for $t {
            fn lifx_from(val: $t) -> Result<Self, Error> { Ok(val)}
        }
    )*

}
}

derive_lifx_from! {
    u8, u16, i16, u32, f32, u64, LifxIdent, EchoPayload, HSBK
}

/// The 32 bytes of a label field, as they came off the wire.
struct LabelBytes([u8; 32]);

impl LifxFrom<LabelBytes> for LifxString {
    fn lifx_from(val: LabelBytes) -> Result<LifxString, Error> {
        if !val.0.is_ascii() {
            return Err(Error::ProtocolError("label is not ASCII".to_owned()));
        }
        // labels are null padded; drop the padding (and any stray nulls)
        let label = val.0.iter().filter(|&&c| c > 0).map(|&c| c as char).collect();
        Ok(LifxString(label))
    }
}

impl LifxFrom<u16> for PowerLevel {
    fn lifx_from(val: u16) -> Result<PowerLevel, Error> {
        Ok(PowerLevel::from_raw(val))
    }
}

/// Opaque 64-byte payload of an echo exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct EchoPayload(pub [u8; 64]);

impl std::fmt::Debug for EchoPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "<EchoPayload>")
    }
}

/// 16-byte identifier used by groups and locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifxIdent(pub [u8; 16]);

/// Lifx strings are fixed-length (32-bytes maximum)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LifxString(pub String);

impl LifxString {
    /// Constructs a new LifxString, keeping only ASCII characters and truncating to 32 of them.
    pub fn new(s: &str) -> LifxString {
        LifxString(s.chars().filter(char::is_ascii).take(32).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LifxString {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

impl std::cmp::PartialEq<str> for LifxString {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

trait LittleEndianWriter<T>: WriteBytesExt {
    fn write_val(&mut self, v: T) -> Result<(), io::Error>;
}

macro_rules! derive_writer {
{ $( $m:ident: $t:ty ),*} => {
    $(
        impl<T: WriteBytesExt> LittleEndianWriter<$t> for T {
            fn write_val(&mut self, v: $t) -> Result<(), io::Error> {
                self . $m ::<LittleEndian>(v)
            }
        }
    )*

}
}

derive_writer! { write_u32: u32, write_u16: u16, write_i16: i16, write_u64: u64, write_f32: f32 }

impl<T: WriteBytesExt> LittleEndianWriter<u8> for T {
    fn write_val(&mut self, v: u8) -> Result<(), io::Error> {
        self.write_u8(v)
    }
}

impl<T> LittleEndianWriter<LifxString> for T
where
    T: WriteBytesExt,
{
    fn write_val(&mut self, v: LifxString) -> Result<(), io::Error> {
        let bytes = v.0.as_bytes();
        for idx in 0..32 {
            self.write_u8(bytes.get(idx).copied().unwrap_or(0))?;
        }
        Ok(())
    }
}

impl<T> LittleEndianWriter<LifxIdent> for T
where
    T: WriteBytesExt,
{
    fn write_val(&mut self, v: LifxIdent) -> Result<(), io::Error> {
        self.write_all(&v.0)
    }
}

impl<T> LittleEndianWriter<EchoPayload> for T
where
    T: WriteBytesExt,
{
    fn write_val(&mut self, v: EchoPayload) -> Result<(), io::Error> {
        self.write_all(&v.0)
    }
}

impl<T> LittleEndianWriter<HSBK> for T
where
    T: WriteBytesExt,
{
    fn write_val(&mut self, v: HSBK) -> Result<(), io::Error> {
        self.write_val(v.hue)?;
        self.write_val(v.saturation)?;
        self.write_val(v.brightness)?;
        self.write_val(v.kelvin)?;
        Ok(())
    }
}

impl<T> LittleEndianWriter<PowerLevel> for T
where
    T: WriteBytesExt,
{
    fn write_val(&mut self, v: PowerLevel) -> Result<(), io::Error> {
        self.write_u16::<LittleEndian>(v as u16)
    }
}

trait LittleEndianReader<T> {
    fn read_val(&mut self) -> Result<T, io::Error>;
}

macro_rules! derive_reader {
{ $( $m:ident: $t:ty ),*} => {
    $(
        impl<T: ReadBytesExt> LittleEndianReader<$t> for T {
            fn read_val(&mut self) -> Result<$t, io::Error> {
                self . $m ::<LittleEndian>()
            }
        }
    )*

}
}

derive_reader! { read_u32: u32, read_u16: u16, read_i16: i16, read_u64: u64, read_f32: f32 }

impl<R: ReadBytesExt> LittleEndianReader<u8> for R {
    fn read_val(&mut self) -> Result<u8, io::Error> {
        self.read_u8()
    }
}

impl<R: ReadBytesExt> LittleEndianReader<HSBK> for R {
    fn read_val(&mut self) -> Result<HSBK, io::Error> {
        let hue = self.read_val()?;
        let sat = self.read_val()?;
        let bri = self.read_val()?;
        let kel = self.read_val()?;
        Ok(HSBK {
            hue,
            saturation: sat,
            brightness: bri,
            kelvin: kel,
        })
    }
}

impl<R: ReadBytesExt> LittleEndianReader<LifxIdent> for R {
    fn read_val(&mut self) -> Result<LifxIdent, io::Error> {
        let mut val = [0; 16];
        self.read_exact(&mut val)?;
        Ok(LifxIdent(val))
    }
}

impl<R: ReadBytesExt> LittleEndianReader<LabelBytes> for R {
    fn read_val(&mut self) -> Result<LabelBytes, io::Error> {
        let mut raw = [0; 32];
        self.read_exact(&mut raw)?;
        Ok(LabelBytes(raw))
    }
}

impl<R: ReadBytesExt> LittleEndianReader<EchoPayload> for R {
    fn read_val(&mut self) -> Result<EchoPayload, io::Error> {
        let mut val = [0; 64];
        self.read_exact(&mut val)?;
        Ok(EchoPayload(val))
    }
}

macro_rules! unpack {
    ($msg:ident, $typ:ident, $( $n:ident: $t:ident ),*) => {
        {
        let mut c = Cursor::new(&$msg.payload);
        $(
            let $n: $t = c.read_val()?;
        )*

        Message::$typ{
            $(
                $n: LifxFrom::lifx_from($n)?,
            )*
        }
        }

    };
}

/// Power level as carried by `SetPower` and `State` messages.
///
/// Bulbs only understand fully off and fully on, so any non-zero level is treated as on.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PowerLevel {
    Standby = 0,
    Enabled = 65535,
}

impl PowerLevel {
    /// Zero maps to [PowerLevel::Standby], everything else to [PowerLevel::Enabled].
    pub fn from_raw(level: u16) -> PowerLevel {
        if level == 0 {
            PowerLevel::Standby
        } else {
            PowerLevel::Enabled
        }
    }

    pub fn is_on(self) -> bool {
        self == PowerLevel::Enabled
    }
}

impl From<bool> for PowerLevel {
    fn from(on: bool) -> PowerLevel {
        if on {
            PowerLevel::Enabled
        } else {
            PowerLevel::Standby
        }
    }
}

/// Decoded LIFX Messages
///
/// The three light commands (`LightGet`, `LightSetColor`, `LightSetPower`) are what a client
/// sends.  `LightState` and `Acknowledgement` are what it acts on.  The other `State*` replies
/// are parsed when they show up, but nothing in this workspace does anything with them.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// StateService - 3
    StateService {
        /// unsigned 8-bit integer; 1 is UDP
        service: u8,
        /// Port number of the light.  If the service is temporarily unavailable, then the port
        /// value will be 0.
        port: u32,
    },

    /// StateHostInfo - 13
    StateHostInfo {
        /// radio receive signal strength in miliWatts
        signal: f32,
        /// Bytes transmitted since power on
        tx: u32,
        /// Bytes received since power on
        rx: u32,
        reserved: i16,
    },

    /// StateHostFirmware - 15
    StateHostFirmware {
        /// Firmware build time (absolute time in nanoseconds since epoch)
        build: u64,
        reserved: u64,
        version: u32,
    },

    /// StateWifiInfo - 17
    StateWifiInfo {
        signal: f32,
        tx: u32,
        rx: u32,
        reserved: i16,
    },

    /// StateWifiFirmware - 19
    StateWifiFirmware {
        build: u64,
        reserved: u64,
        version: u32,
    },

    /// StatePower - 22
    ///
    /// The older device-level power reply.  Level is passed through unchanged.
    StatePower { level: u16 },

    /// StateLabel - 25
    StateLabel { label: LifxString },

    /// StateVersion - 33
    StateVersion {
        vendor: u32,
        product: u32,
        version: u32,
    },

    /// StateInfo - 35
    StateInfo {
        /// current time (absolute time in nanoseconds since epoch)
        time: u64,
        /// time since last power on (relative time in nanoseconds)
        uptime: u64,
        /// last power off period (5 second accuracy, in nanoseconds)
        downtime: u64,
    },

    /// Acknowledgement - 45
    ///
    /// Response to any message sent with ack_required set to 1.
    ///
    /// (Note that technically this message has no payload, but the frame sequence number is stored
    /// here for convenience).
    Acknowledgement { seq: u8 },

    /// StateLocation - 50
    StateLocation {
        location: LifxIdent,
        label: LifxString,
        updated_at: u64,
    },

    /// StateGroup - 53
    StateGroup {
        group: LifxIdent,
        label: LifxString,
        updated_at: u64,
    },

    /// EchoResponse - 59
    EchoResponse { payload: EchoPayload },

    /// Get - 101
    ///
    /// Asks a light for its state. No payload.  Causes the device to transmit a
    /// [Message::LightState] message.
    LightGet,

    /// SetColor - 102
    LightSetColor {
        reserved: u8,
        color: HSBK,
        /// Color transition time in milliseconds
        duration: u32,
    },

    /// State - 107
    ///
    /// Sent by a device to provide the current light state.  `power` is the raw level.
    LightState {
        color: HSBK,
        reserved: i16,
        power: u16,
        label: LifxString,
        reserved2: u64,
    },

    /// SetPower - 117
    LightSetPower {
        level: PowerLevel,
        /// Power transition time in milliseconds
        duration: u32,
    },

    /// StatePower - 118
    LightStatePower { level: u16 },

    /// Any message type not listed above.  The payload is kept verbatim.
    Unknown { typ: u16, payload: Vec<u8> },
}

impl Message {
    pub fn get_num(&self) -> u16 {
        match *self {
            Message::StateService { .. } => 3,
            Message::StateHostInfo { .. } => 13,
            Message::StateHostFirmware { .. } => 15,
            Message::StateWifiInfo { .. } => 17,
            Message::StateWifiFirmware { .. } => 19,
            Message::StatePower { .. } => 22,
            Message::StateLabel { .. } => 25,
            Message::StateVersion { .. } => 33,
            Message::StateInfo { .. } => 35,
            Message::Acknowledgement { .. } => 45,
            Message::StateLocation { .. } => 50,
            Message::StateGroup { .. } => 53,
            Message::EchoResponse { .. } => 59,
            Message::LightGet => 101,
            Message::LightSetColor { .. } => 102,
            Message::LightState { .. } => 107,
            Message::LightSetPower { .. } => 117,
            Message::LightStatePower { .. } => 118,
            Message::Unknown { typ, .. } => typ,
        }
    }

    /// Tries to parse the payload in a [RawMessage], based on its message type.
    ///
    /// Payloads longer than expected are accepted and the extra bytes ignored.
    pub fn from_raw(msg: &RawMessage) -> Result<Message, Error> {
        let typ = msg.protocol_header.typ;
        let needed = payload_size(typ);
        if msg.payload.len() < needed {
            return Err(Error::Truncated {
                needed: HEADER_SIZE + needed,
                available: HEADER_SIZE + msg.payload.len(),
            });
        }

        match typ {
            3 => Ok(unpack!(msg, StateService, service: u8, port: u32)),
            13 => Ok(unpack!(
                msg,
                StateHostInfo,
                signal: f32,
                tx: u32,
                rx: u32,
                reserved: i16
            )),
            15 => Ok(unpack!(
                msg,
                StateHostFirmware,
                build: u64,
                reserved: u64,
                version: u32
            )),
            17 => Ok(unpack!(
                msg,
                StateWifiInfo,
                signal: f32,
                tx: u32,
                rx: u32,
                reserved: i16
            )),
            19 => Ok(unpack!(
                msg,
                StateWifiFirmware,
                build: u64,
                reserved: u64,
                version: u32
            )),
            22 => Ok(unpack!(msg, StatePower, level: u16)),
            25 => Ok(unpack!(msg, StateLabel, label: LabelBytes)),
            33 => Ok(unpack!(
                msg,
                StateVersion,
                vendor: u32,
                product: u32,
                version: u32
            )),
            35 => Ok(unpack!(
                msg,
                StateInfo,
                time: u64,
                uptime: u64,
                downtime: u64
            )),
            45 => Ok(Message::Acknowledgement {
                seq: msg.frame_addr.sequence,
            }),
            50 => Ok(unpack!(
                msg,
                StateLocation,
                location: LifxIdent,
                label: LabelBytes,
                updated_at: u64
            )),
            53 => Ok(unpack!(
                msg,
                StateGroup,
                group: LifxIdent,
                label: LabelBytes,
                updated_at: u64
            )),
            59 => Ok(unpack!(msg, EchoResponse, payload: EchoPayload)),
            101 => Ok(Message::LightGet),
            102 => Ok(unpack!(
                msg,
                LightSetColor,
                reserved: u8,
                color: HSBK,
                duration: u32
            )),
            107 => Ok(unpack!(
                msg,
                LightState,
                color: HSBK,
                reserved: i16,
                power: u16,
                label: LabelBytes,
                reserved2: u64
            )),
            117 => Ok(unpack!(msg, LightSetPower, level: u16, duration: u32)),
            118 => Ok(unpack!(msg, LightStatePower, level: u16)),
            typ => Ok(Message::Unknown {
                typ,
                payload: msg.payload.clone(),
            }),
        }
    }
}

/// Minimum payload length, in bytes, for a given message type.
///
/// Unrecognized types have no minimum.
fn payload_size(typ: u16) -> usize {
    match typ {
        3 => 5,
        13 | 17 => 14,
        15 | 19 => 20,
        22 | 118 => 2,
        25 => 32,
        33 => 12,
        35 => 24,
        50 | 53 => 56,
        59 => 64,
        102 => 13,
        107 => 52,
        117 => 6,
        _ => 0,
    }
}

/// Bulb color (Hue-Saturation-Brightness-Kelvin)
///
/// # Notes:
///
/// When a light is displaying whites, saturation will be zero, hue will be ignored, and only
/// brightness and kelvin will matter.
///
/// Valid values for "kelvin" are from 2500 (warm/yellow) to 9000 (cool/blue).  Use
/// [HSBK::clamped] to build a color from caller-supplied values.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct HSBK {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl HSBK {
    pub const HUE_MAX: u16 = 65535;
    pub const SATURATION_MAX: u16 = 65535;
    pub const BRIGHTNESS_MAX: u16 = 65535;
    pub const KELVIN_MIN: u16 = 2500;
    pub const KELVIN_MAX: u16 = 9000;

    /// Builds a color, clamping every component into its valid range.
    ///
    /// Out of range values are saturated, never wrapped: a hue of 70000 becomes 65535, and a
    /// kelvin of 1000 becomes 2500.
    pub fn clamped(hue: u32, saturation: u32, brightness: u32, kelvin: u32) -> HSBK {
        let clamp = |v: u32, lo: u16, hi: u16| v.clamp(u32::from(lo), u32::from(hi)) as u16;
        HSBK {
            hue: clamp(hue, 0, Self::HUE_MAX),
            saturation: clamp(saturation, 0, Self::SATURATION_MAX),
            brightness: clamp(brightness, 0, Self::BRIGHTNESS_MAX),
            kelvin: clamp(kelvin, Self::KELVIN_MIN, Self::KELVIN_MAX),
        }
    }

    pub fn describe(&self, short: bool) -> String {
        match short {
            true if self.saturation == 0 => format!("{}K", self.kelvin),
            true => format!(
                "{:.0}/{:.0}",
                (self.hue as f32 / 65535.0) * 360.0,
                self.saturation as f32 / 655.35
            ),
            false if self.saturation == 0 => format!(
                "{:.0}% White ({})",
                self.brightness as f32 / 655.35,
                describe_kelvin(self.kelvin)
            ),
            false => format!(
                "{:.0}% hue: {} sat: {}",
                self.brightness as f32 / 655.35,
                self.hue,
                self.saturation
            ),
        }
    }
}

/// Describe (in english words) the color temperature as given in kelvin.
///
/// These descriptions match the values shown in the LIFX mobile app.
pub fn describe_kelvin(k: u16) -> &'static str {
    match k {
        0..=2500 => "Ultra Warm",
        2501..=2700 => "Incandescent",
        2701..=3000 => "Warm",
        3001..=3200 => "Neutral Warm",
        3201..=3500 => "Neutral",
        3501..=4000 => "Cool",
        4001..=4500 => "Cool Daylight",
        4501..=5000 => "Soft Daylight",
        5001..=5500 => "Daylight",
        5501..=6000 => "Noon Daylight",
        6001..=6500 => "Bright Daylight",
        6501..=7000 => "Cloudy Daylight",
        7001..=7500 => "Blue Daylight",
        7501..=8000 => "Blue Overcast",
        8001..=8500 => "Blue Water",
        _ => "Blue Ice",
    }
}

/// The raw message structure
///
/// Contains a low-level protocol info.  This is what is sent and received via UDP packets.
///
/// To parse the payload, use [Message::from_raw].
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub frame: Frame,
    pub frame_addr: FrameAddress,
    pub protocol_header: ProtocolHeader,
    pub payload: Vec<u8>,
}

/// The Frame section contains information about the following:
///
/// * Size of the entire message (in this client's doubled encoding)
/// * LIFX Protocol number: must be 1024 (decimal)
/// * Use of the Frame Address target field
/// * Source identifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// 16 bits: `(packet length - 2) << 1`, see the crate docs
    pub size: u16,

    /// 2 bits: Message origin indicator
    pub origin: u8,

    /// 1 bit: Determines usage of the Frame Address target field
    pub tagged: bool,

    /// 1 bit: Message includes a target address
    pub addressable: bool,

    /// 12 bits: Protocol number: must be 1024 (decimal)
    pub protocol: u16,

    /// 32 bits: Source identifier: unique value set by the client, used by responses.
    pub source: u32,
}

/// The Frame Address section contains the following routing information:
///
/// * Target device address
/// * Acknowledgement message is required flag
/// * State response message is required flag
/// * Message sequence number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAddress {
    /// 64 bits: 6 byte device address (MAC address) or zero (0) means all devices
    pub target: u64,

    /// 48 bits: Must all be zero (0)
    pub reserved: [u8; 6],

    /// 6 bits: Reserved
    pub reserved2: u8,

    /// 1 bit: Acknowledgement message required
    pub ack_required: bool,

    /// 1 bit: Response message required
    pub res_required: bool,

    /// 8 bits: Wrap around message sequence number
    pub sequence: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolHeader {
    /// 64 bits: Reserved
    pub reserved: u64,

    /// 16 bits: Message type determines the payload being used
    pub typ: u16,

    /// 16 bits: Reserved
    pub reserved2: u16,
}

impl Frame {
    /// packed sized, in bytes
    fn packed_size() -> usize {
        8
    }

    fn validate(&self) -> Result<(), Error> {
        if self.protocol != PROTOCOL_NUMBER {
            return Err(Error::ProtocolError(format!(
                "Unpacked frame had protocol version {}",
                self.protocol
            )));
        }
        Ok(())
    }

    fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(Self::packed_size());

        v.write_u16::<LittleEndian>(self.size)?;

        // pack origin + tagged + addressable +  protocol as a u16
        let mut d: u16 = (u16::from(self.origin) & 0b11) << 14;
        d += u16::from(self.tagged) << 13;
        d += u16::from(self.addressable) << 12;
        d += self.protocol & 0b1111_1111_1111;

        v.write_u16::<LittleEndian>(d)?;

        v.write_u32::<LittleEndian>(self.source)?;

        Ok(v)
    }

    fn unpack(v: &[u8]) -> Result<Frame, Error> {
        let mut c = Cursor::new(v);

        let size = c.read_val()?;

        // origin + tagged + addressable + protocol
        let d: u16 = c.read_val()?;

        let origin: u8 = ((d & 0b1100_0000_0000_0000) >> 14) as u8;
        let tagged: bool = (d & 0b0010_0000_0000_0000) > 0;
        let addressable = (d & 0b0001_0000_0000_0000) > 0;
        let protocol: u16 = d & 0b0000_1111_1111_1111;

        let source = c.read_val()?;

        let frame = Frame {
            size,
            origin,
            tagged,
            addressable,
            protocol,
            source,
        };
        frame.validate()?;
        Ok(frame)
    }
}

impl FrameAddress {
    fn packed_size() -> usize {
        16
    }

    fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(Self::packed_size());
        v.write_u64::<LittleEndian>(self.target)?;
        v.extend_from_slice(&self.reserved);

        let b: u8 = ((self.reserved2 & 0b11_1111) << 2)
            + if self.ack_required { 2 } else { 0 }
            + if self.res_required { 1 } else { 0 };
        v.write_u8(b)?;
        v.write_u8(self.sequence)?;
        Ok(v)
    }

    fn unpack(v: &[u8]) -> Result<FrameAddress, Error> {
        let mut c = Cursor::new(v);

        let target = c.read_val()?;

        let mut reserved: [u8; 6] = [0; 6];
        c.read_exact(&mut reserved)?;

        let b: u8 = c.read_val()?;
        let reserved2: u8 = (b & 0b1111_1100) >> 2;
        let ack_required = (b & 0b10) > 0;
        let res_required = (b & 0b01) > 0;

        let sequence = c.read_val()?;

        Ok(FrameAddress {
            target,
            reserved,
            reserved2,
            ack_required,
            res_required,
            sequence,
        })
    }
}

impl ProtocolHeader {
    fn packed_size() -> usize {
        12
    }

    fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(Self::packed_size());
        v.write_u64::<LittleEndian>(self.reserved)?;
        v.write_u16::<LittleEndian>(self.typ)?;
        v.write_u16::<LittleEndian>(self.reserved2)?;
        Ok(v)
    }

    fn unpack(v: &[u8]) -> Result<ProtocolHeader, Error> {
        let mut c = Cursor::new(v);

        let reserved = c.read_val()?;
        let typ = c.read_val()?;
        let reserved2 = c.read_val()?;

        Ok(ProtocolHeader {
            reserved,
            typ,
            reserved2,
        })
    }
}

/// Options used to contruct a [RawMessage].
///
/// See also [RawMessage::build].  The defaults describe every packet this client sends: a
/// broadcast-style packet (tagged, zero target) from [CLIENT_SOURCE], asking for both an
/// acknowledgement and a response.  Bulbs are addressed by IP, never by target ID.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Acknowledgement message required.
    ///
    /// Causes the light to send an [Message::Acknowledgement] message.
    pub ack_required: bool,
    /// Response message required.
    pub res_required: bool,
    /// A wrap around sequence number.
    ///
    /// The acknowledgement for this packet carries the same sequence number back.
    pub sequence: u8,
    /// A unique client identifier.
    pub source: u32,
}

impl std::default::Default for BuildOptions {
    fn default() -> BuildOptions {
        BuildOptions {
            ack_required: true,
            res_required: true,
            sequence: 0,
            source: CLIENT_SOURCE,
        }
    }
}

impl RawMessage {
    /// Build a RawMessage (which is suitable for sending on the network) from a given Message
    /// type.
    ///
    /// An [Message::Acknowledgement] carries its sequence number in the header, so for that
    /// message `seq` overrides [BuildOptions::sequence].
    pub fn build(options: &BuildOptions, typ: Message) -> Result<RawMessage, Error> {
        let frame = Frame {
            size: 0,
            origin: 0,
            tagged: true,
            addressable: true,
            protocol: PROTOCOL_NUMBER,
            source: options.source,
        };
        let mut addr = FrameAddress {
            target: 0,
            reserved: [0; 6],
            reserved2: 0,
            ack_required: options.ack_required,
            res_required: options.res_required,
            sequence: options.sequence,
        };
        let phead = ProtocolHeader {
            reserved: 0,
            reserved2: 0,
            typ: typ.get_num(),
        };

        let mut v = Vec::new();
        match typ {
            Message::LightGet => {
                // no payload
            }
            Message::Acknowledgement { seq } => {
                addr.sequence = seq;
            }
            Message::StateService { service, port } => {
                v.write_val(service)?;
                v.write_val(port)?;
            }
            Message::StateHostInfo {
                signal,
                tx,
                rx,
                reserved,
            }
            | Message::StateWifiInfo {
                signal,
                tx,
                rx,
                reserved,
            } => {
                v.write_val(signal)?;
                v.write_val(tx)?;
                v.write_val(rx)?;
                v.write_val(reserved)?;
            }
            Message::StateHostFirmware {
                build,
                reserved,
                version,
            }
            | Message::StateWifiFirmware {
                build,
                reserved,
                version,
            } => {
                v.write_val(build)?;
                v.write_val(reserved)?;
                v.write_val(version)?;
            }
            Message::StatePower { level } | Message::LightStatePower { level } => {
                v.write_val(level)?;
            }
            Message::StateLabel { label } => {
                v.write_val(label)?;
            }
            Message::StateVersion {
                vendor,
                product,
                version,
            } => {
                v.write_val(vendor)?;
                v.write_val(product)?;
                v.write_val(version)?;
            }
            Message::StateInfo {
                time,
                uptime,
                downtime,
            } => {
                v.write_val(time)?;
                v.write_val(uptime)?;
                v.write_val(downtime)?;
            }
            Message::StateLocation {
                location: ident,
                label,
                updated_at,
            }
            | Message::StateGroup {
                group: ident,
                label,
                updated_at,
            } => {
                v.write_val(ident)?;
                v.write_val(label)?;
                v.write_val(updated_at)?;
            }
            Message::EchoResponse { payload } => {
                v.write_val(payload)?;
            }
            Message::LightSetColor {
                reserved,
                color,
                duration,
            } => {
                v.write_val(reserved)?;
                v.write_val(color)?;
                v.write_val(duration)?;
            }
            Message::LightState {
                color,
                reserved,
                power,
                label,
                reserved2,
            } => {
                v.write_val(color)?;
                v.write_val(reserved)?;
                v.write_val(power)?;
                v.write_val(label)?;
                v.write_val(reserved2)?;
            }
            Message::LightSetPower { level, duration } => {
                v.write_val(level)?;
                v.write_val(duration)?;
            }
            Message::Unknown { payload, .. } => {
                v = payload;
            }
        }

        let mut msg = RawMessage {
            frame,
            frame_addr: addr,
            protocol_header: phead,
            payload: v,
        };

        msg.frame.size = wire_size(msg.packed_size())?;

        Ok(msg)
    }

    /// The total size (in bytes) of the packed version of this message.
    pub fn packed_size(&self) -> usize {
        Frame::packed_size()
            + FrameAddress::packed_size()
            + ProtocolHeader::packed_size()
            + self.payload.len()
    }

    /// Packs this RawMessage into some bytes that can be send over the network.
    ///
    /// The length of the returned data will be [RawMessage::packed_size] in size.
    pub fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(self.packed_size());
        v.extend(self.frame.pack()?);
        v.extend(self.frame_addr.pack()?);
        v.extend(self.protocol_header.pack()?);
        v.extend(&self.payload);
        Ok(v)
    }

    /// Given some bytes (generally read from a network socket), unpack the data into a
    /// `RawMessage` structure.
    ///
    /// The header layout is checked strictly; the payload is whatever follows it.
    pub fn unpack(v: &[u8]) -> Result<RawMessage, Error> {
        if v.len() < HEADER_SIZE {
            return Err(Error::Truncated {
                needed: HEADER_SIZE,
                available: v.len(),
            });
        }
        let mut start = 0;
        let frame = Frame::unpack(v)?;
        start += Frame::packed_size();
        let addr = FrameAddress::unpack(&v[start..])?;
        start += FrameAddress::packed_size();
        let proto = ProtocolHeader::unpack(&v[start..])?;
        start += ProtocolHeader::packed_size();

        Ok(RawMessage {
            frame,
            frame_addr: addr,
            protocol_header: proto,
            payload: Vec::from(&v[start..]),
        })
    }
}

/// Computes the value of [Frame::size] for a packet of `packed_len` bytes.
///
/// The two size bytes themselves are not counted, and the result is doubled.
pub fn wire_size(packed_len: usize) -> Result<u16, Error> {
    let doubled = packed_len.saturating_sub(2) << 1;
    u16::try_from(doubled)
        .map_err(|_| Error::ProtocolError(format!("packet of {} bytes is too large", packed_len)))
}

/// A decoded datagram: the raw header fields plus the parsed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub frame: Frame,
    pub frame_addr: FrameAddress,
    pub protocol_header: ProtocolHeader,
    pub message: Message,
}

impl Packet {
    pub fn sequence(&self) -> u8 {
        self.frame_addr.sequence
    }
}

/// Builds and packs `msg` with the given sequence number, using the default [BuildOptions].
pub fn encode(sequence: u8, msg: Message) -> Result<Vec<u8>, Error> {
    let options = BuildOptions {
        sequence,
        ..Default::default()
    };
    RawMessage::build(&options, msg)?.pack()
}

/// Unpacks a datagram and parses its payload.
pub fn decode(bytes: &[u8]) -> Result<Packet, Error> {
    let raw = RawMessage::unpack(bytes)?;
    let message = Message::from_raw(&raw)?;
    Ok(Packet {
        frame: raw.frame,
        frame_addr: raw.frame_addr,
        protocol_header: raw.protocol_header,
        message,
    })
}
