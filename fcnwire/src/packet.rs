//! Packet encoding and decoding

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::WireError;
use crate::time::GcnTime;

/// Number of 4-byte words in a packet
pub const PACKET_WORDS: usize = 40;

/// Size of a packet on the wire
pub const PACKET_SIZE: usize = PACKET_WORDS * 4;

/// Value carried in the last word of every well-formed packet
pub const TERMINATOR: i32 = 10;

/// Hop count stamped on every packet this network originates
pub const HOP_COUNT: i32 = 1;

/// Scale applied to RA/Dec degrees on the wire
const POSITION_SCALE: f64 = 10_000.0;

const W_TYPE: usize = 0;
const W_SERIAL: usize = 1;
const W_HOPS: usize = 2;
const W_PKT_SOD: usize = 3;
const W_EVENT_ID: usize = 4;
const W_EVENT_TJD: usize = 5;
const W_EVENT_SOD: usize = 6;
const W_RA: usize = 7;
const W_DEC: usize = 8;
const W_EXTRA: usize = 9;
const W_TERM: usize = PACKET_WORDS - 1;

/// Notification types carried on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Test,
    IAmAlive,
    Kill,
    Session,
    Trigger,
}

impl PacketType {
    pub const ALL: [PacketType; 5] = [Self::Test, Self::IAmAlive, Self::Kill, Self::Session, Self::Trigger];

    /// Numeric code in word 0
    pub fn code(self) -> i32 {
        match self {
            Self::Test => 2,
            Self::IAmAlive => 3,
            Self::Kill => 4,
            Self::Session => 11,
            Self::Trigger => 12,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Symbolic name used in logs and the command hand-off file
    pub fn name(self) -> &'static str {
        match self {
            Self::Test => "TEST",
            Self::IAmAlive => "IAMALIVE",
            Self::Kill => "KILL",
            Self::Session => "SESSION",
            Self::Trigger => "TRIGGER",
        }
    }

    /// Whether words 7-9 (position and extra) carry data for this type
    fn has_position(self) -> bool {
        matches!(self, Self::Session | Self::Trigger)
    }

    /// Whether word 4 carries the event number for this type
    fn has_event_id(self) -> bool {
        matches!(self, Self::Test | Self::Session | Self::Trigger)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PacketType {
    type Err = WireError;

    /// Accepts the symbolic names case-insensitively, with or without the `VLA_FRB_` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("VLA_FRB_").unwrap_or(&upper);
        Self::ALL
            .into_iter()
            .find(|t| t.name() == bare)
            .ok_or_else(|| WireError::UnknownEventType(s.to_string()))
    }
}

/// Event payload of a notification
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event number (session #, trigger #, test #)
    pub serial: i32,
    /// Event time, UNIX seconds
    pub time: f64,
    /// Right ascension, degrees J2000
    pub ra: f64,
    /// Declination, degrees J2000
    pub dec: f64,
    /// Session duration in seconds (SESSION) or dispersion measure (TRIGGER)
    pub extra: Option<f64>,
}

impl Event {
    pub fn new(serial: i32, time: f64, ra: f64, dec: f64) -> Self {
        Self {
            serial,
            time,
            ra,
            dec,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: f64) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// Build a packet stamped with the current time
pub fn encode(packet_type: PacketType, packet_serial: i32, event: &Event) -> Result<[u8; PACKET_SIZE], WireError> {
    encode_at(packet_type, packet_serial, event, GcnTime::now())
}

/// Build a packet stamped with an explicit send time
pub fn encode_at(
    packet_type: PacketType,
    packet_serial: i32,
    event: &Event,
    sent: GcnTime,
) -> Result<[u8; PACKET_SIZE], WireError> {
    let mut words = [0i32; PACKET_WORDS];
    let event_time = GcnTime::try_from_unix(event.time).ok_or(WireError::OutOfRange {
        field: "time",
        value: event.time,
    })?;

    words[W_TYPE] = packet_type.code();
    words[W_SERIAL] = packet_serial;
    words[W_HOPS] = HOP_COUNT;
    words[W_PKT_SOD] = sent.sod;
    if packet_type.has_event_id() {
        words[W_EVENT_ID] = event.serial;
    }
    words[W_EVENT_TJD] = event_time.tjd;
    words[W_EVENT_SOD] = event_time.sod;
    if packet_type.has_position() {
        words[W_RA] = scale("ra", event.ra, POSITION_SCALE)?;
        words[W_DEC] = scale("dec", event.dec, POSITION_SCALE)?;
        if let Some(extra) = event.extra {
            words[W_EXTRA] = scale("extra", extra, 1.0)?;
        }
    }
    words[W_TERM] = TERMINATOR;

    let mut out = [0u8; PACKET_SIZE];
    for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    Ok(out)
}

fn scale(field: &'static str, value: f64, factor: f64) -> Result<i32, WireError> {
    let scaled = (value * factor).round();
    if !scaled.is_finite() || scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
        return Err(WireError::OutOfRange { field, value });
    }
    Ok(scaled as i32)
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Raw code from word 0
    pub type_code: i32,
    /// Symbolic type, `None` when the code is unknown
    pub packet_type: Option<PacketType>,
    pub serial: i32,
    pub hop_count: i32,
    /// Packet send time, centiseconds of day
    pub sent_sod: i32,
    pub event_id: i32,
    /// Human readable name such as `SESSION #42`
    pub event_name: String,
    /// Event time, UNIX seconds
    pub event_time: f64,
    pub ra: f64,
    pub dec: f64,
    pub extra: i32,
    pub terminator: i32,
}

impl Notification {
    pub fn terminator_ok(&self) -> bool {
        self.terminator == TERMINATOR
    }

    /// Only SESSION and TRIGGER notices are forwarded to an observing decision
    pub fn is_actionable(&self) -> bool {
        matches!(self.packet_type, Some(PacketType::Session | PacketType::Trigger))
    }

    /// Type name, or `Unknown` for unrecognized codes
    pub fn type_name(&self) -> &'static str {
        self.packet_type.map(PacketType::name).unwrap_or("Unknown")
    }
}

/// Decode a packet
///
/// A bad terminator is reported as a warning but the packet is still returned.
pub fn decode(buf: &[u8]) -> Result<Notification, WireError> {
    if buf.len() < PACKET_SIZE {
        return Err(WireError::Truncated {
            expected: PACKET_SIZE,
            actual: buf.len(),
        });
    }

    let mut words = [0i32; PACKET_WORDS];
    for (word, chunk) in words.iter_mut().zip(buf[..PACKET_SIZE].chunks_exact(4)) {
        *word = i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let packet_type = PacketType::from_code(words[W_TYPE]);
    let type_name = packet_type.map(PacketType::name).unwrap_or("Unknown");
    let event_time = GcnTime {
        tjd: words[W_EVENT_TJD],
        sod: words[W_EVENT_SOD],
    };

    let notification = Notification {
        type_code: words[W_TYPE],
        packet_type,
        serial: words[W_SERIAL],
        hop_count: words[W_HOPS],
        sent_sod: words[W_PKT_SOD],
        event_id: words[W_EVENT_ID],
        event_name: format!("{} #{}", type_name, words[W_EVENT_ID]),
        event_time: event_time.to_unix(),
        ra: f64::from(words[W_RA]) / POSITION_SCALE,
        dec: f64::from(words[W_DEC]) / POSITION_SCALE,
        extra: words[W_EXTRA],
        terminator: words[W_TERM],
    };

    if !notification.terminator_ok() {
        warn!(
            serial = notification.serial,
            terminator = notification.terminator,
            size = buf.len(),
            "Packet may be invalid because of an invalid terminator"
        );
    }

    Ok(notification)
}

/// Read the type code from the first word without decoding the rest
pub fn peek_type(buf: &[u8]) -> Option<i32> {
    let head: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(i32::from_be_bytes(head))
}
