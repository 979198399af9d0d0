//! Notification receiver
//!
//! Partner-side endpoint: accepts one inbound connection at a time, acknowledges
//! each packet by echoing it, and hands raw packets to a background processor
//! through an unbounded FIFO queue so socket reads never wait on processing.

use std::net::SocketAddr;

use tokio::sync::mpsc;

pub mod handler;
pub mod listener;
pub mod log;
pub mod processor;

pub use handler::{LoggingHandler, Notice, NoticeHandler};
pub use listener::{ConnectionState, ReceiveOutcome, Receiver, ReceiverConfig};
pub use log::ReceiveLog;
pub use processor::{PacketProcessor, spawn_processor};

/// An entry on the inbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    /// Raw packet bytes and the peer that sent them
    Packet { data: Vec<u8>, peer: SocketAddr },
    /// Tells the processor to exit once everything before it is handled
    Shutdown,
}

pub type InboundSender = mpsc::UnboundedSender<QueueEntry>;
pub type InboundReceiver = mpsc::UnboundedReceiver<QueueEntry>;

/// Create the inbound queue shared by a receiver and its processor
pub fn inbound_queue() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}
