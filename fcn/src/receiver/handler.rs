//! Observing decisions for received notices

use std::net::SocketAddr;

use eyre::Result;
use fcnwire::{Notification, PacketType};
use tracing::{debug, info};

/// A SESSION or TRIGGER notice ready for an observing decision
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub packet_type: PacketType,
    /// Packet serial number
    pub serial: i32,
    /// Event name such as `SESSION #1019`
    pub event_name: String,
    pub event_id: i32,
    /// Event time, UNIX seconds
    pub time: f64,
    pub ra: f64,
    pub dec: f64,
    /// Duration in seconds for SESSION, DM for TRIGGER
    pub extra: i32,
    pub peer: SocketAddr,
}

impl Notice {
    /// Build a notice from a decoded packet, `None` for non-actionable types
    pub fn from_notification(n: &Notification, peer: SocketAddr) -> Option<Self> {
        let packet_type = n.packet_type.filter(|_| n.is_actionable())?;
        Some(Self {
            packet_type,
            serial: n.serial,
            event_name: n.event_name.clone(),
            event_id: n.event_id,
            time: n.event_time,
            ra: n.ra,
            dec: n.dec,
            extra: n.extra,
            peer,
        })
    }

    /// A SESSION notice with positive duration asks partners to start observing
    pub fn is_session_start(&self) -> bool {
        self.packet_type == PacketType::Session && self.extra > 0
    }

    /// A SESSION notice with zero or negative duration ends the observation
    pub fn is_session_end(&self) -> bool {
        self.packet_type == PacketType::Session && self.extra <= 0
    }
}

/// Consumer of decoded notices, run on the background processor
pub trait NoticeHandler: Send + 'static {
    fn handle(&mut self, notice: &Notice) -> Result<()>;
}

/// Reports what the partner telescope would do for each notice
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl NoticeHandler for LoggingHandler {
    fn handle(&mut self, notice: &Notice) -> Result<()> {
        debug!(?notice, "LoggingHandler::handle");
        if notice.is_session_start() {
            info!(event = %notice.event_name, "Found START notice for session");
            info!(
                "I will now observe RA/Dec {:.4} {:.4} for {} seconds",
                notice.ra, notice.dec, notice.extra
            );
        } else if notice.is_session_end() {
            info!(event = %notice.event_name, "Found END notice for session");
            info!("I will now CEASE observation of ({:.4}, {:.4})", notice.ra, notice.dec);
        } else {
            info!(
                event = %notice.event_name,
                dm = notice.extra,
                "Found TRIGGER at RA/Dec {:.4} {:.4}",
                notice.ra,
                notice.dec
            );
        }
        Ok(())
    }
}
