//! fcnwire - FRB Coordination Network packet format
//!
//! Every notification exchanged between the VLA and its partner observatories is a
//! single fixed-size record of 40 big-endian signed 32-bit words (160 bytes), laid
//! out after the GCN socket notices.
//!
//! # Layout
//!
//! ```text
//! word  TEST       IAMALIVE   KILL       SESSION        TRIGGER
//!  0    type       type       type       type           type
//!  1    serial     serial     serial     serial         serial
//!  2    hop count  hop count  hop count  hop count      hop count
//!  3    pkt sod    pkt sod    pkt sod    pkt sod        pkt sod
//!  4    test #     -          -          session #      trigger #
//!  5    tjd        tjd        tjd        tjd            tjd
//!  6    sod        sod        sod        sod            sod
//!  7    -          -          -          ra * 10^4      ra * 10^4
//!  8    -          -          -          dec * 10^4     dec * 10^4
//!  9    -          -          -          duration (s)   dm
//! 10-38 spare (0)
//! 39    terminator (10)
//! ```
//!
//! # Example
//!
//! ```
//! use fcnwire::{Event, PacketType, decode, encode};
//!
//! let event = Event::new(42, 1_445_980_000.0, 83.6331, 22.0145).with_extra(10800.0);
//! let bytes = encode(PacketType::Session, 7, &event).unwrap();
//! let notice = decode(&bytes).unwrap();
//! assert_eq!(notice.packet_type, Some(PacketType::Session));
//! assert_eq!(notice.extra, 10800);
//! ```

mod error;
mod packet;
mod time;

pub use error::WireError;
pub use packet::{
    Event, HOP_COUNT, Notification, PACKET_SIZE, PACKET_WORDS, PacketType, TERMINATOR, decode, encode, encode_at,
    peek_type,
};
pub use time::{GcnTime, mjd_mpm, unix_now};
