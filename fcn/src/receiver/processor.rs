//! Background packet processor
//!
//! Drains the inbound queue in FIFO order, decodes each packet and routes
//! SESSION/TRIGGER notices to a [`NoticeHandler`]. A failure on one entry is
//! logged with its full error chain and the loop moves on to the next.

use std::net::SocketAddr;

use eyre::{Context, Result};
use fcnwire::PacketType;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::handler::{Notice, NoticeHandler};
use super::{InboundReceiver, InboundSender, QueueEntry, inbound_queue};

/// Consumes the inbound queue on behalf of a handler
pub struct PacketProcessor<H> {
    handler: H,
}

impl<H: NoticeHandler> PacketProcessor<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Process entries until the shutdown sentinel arrives or every sender is gone
    ///
    /// Returns the handler so callers can inspect it after shutdown.
    pub async fn run(mut self, mut queue: InboundReceiver) -> H {
        debug!("PacketProcessor::run: starting");
        while let Some(entry) = queue.recv().await {
            match entry {
                QueueEntry::Packet { data, peer } => {
                    if let Err(e) = self.process(&data, peer) {
                        error!(%peer, error = ?e, "Packet processing failed");
                    }
                }
                QueueEntry::Shutdown => {
                    debug!("PacketProcessor::run: shutdown sentinel received");
                    break;
                }
            }
        }
        info!("Packet processor stopped");
        self.handler
    }

    /// Decode one packet and act on it
    pub fn process(&mut self, data: &[u8], peer: SocketAddr) -> Result<()> {
        let notification = fcnwire::decode(data).context("Failed to decode packet")?;
        debug!(%peer, packet_type = notification.type_name(), "PacketProcessor::process: checking packet");

        match notification.packet_type {
            None => {
                error!(
                    type_code = notification.type_code,
                    serial = notification.serial,
                    "Unknown notification type, dropping"
                );
            }
            Some(PacketType::IAmAlive) => {
                debug!(serial = notification.serial, "IAMALIVE packet received, dropping");
            }
            Some(PacketType::Kill) => {
                debug!(serial = notification.serial, "KILL packet reached the processor, dropping");
            }
            Some(PacketType::Test) => {
                debug!(serial = notification.serial, "TEST packet received, dropping");
            }
            Some(PacketType::Session | PacketType::Trigger) => {
                if let Some(notice) = Notice::from_notification(&notification, peer) {
                    debug!(event = %notice.event_name, serial = notice.serial, "Got event");
                    self.handler
                        .handle(&notice)
                        .with_context(|| format!("Handler failed for {}", notice.event_name))?;
                }
            }
        }
        Ok(())
    }
}

/// Create the inbound queue and spawn a processor draining it
pub fn spawn_processor<H: NoticeHandler>(handler: H) -> (InboundSender, JoinHandle<H>) {
    let (tx, rx) = inbound_queue();
    let handle = tokio::spawn(PacketProcessor::new(handler).run(rx));
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcnwire::{Event, encode};

    /// Records notices and fails on the ones it is told to reject
    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
        reject: Option<String>,
    }

    impl NoticeHandler for Recorder {
        fn handle(&mut self, notice: &Notice) -> Result<()> {
            if self.reject.as_deref() == Some(notice.event_name.as_str()) {
                return Err(eyre::eyre!("rejected {}", notice.event_name));
            }
            self.seen.push(notice.event_name.clone());
            Ok(())
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    fn packet(packet_type: PacketType, id: i32) -> Vec<u8> {
        let event = Event::new(id, 1_445_980_000.0, 10.0, 20.0).with_extra(60.0);
        encode(packet_type, 1, &event).unwrap().to_vec()
    }

    fn entry(data: Vec<u8>) -> QueueEntry {
        QueueEntry::Packet { data, peer: peer() }
    }

    #[tokio::test]
    async fn test_routes_only_session_and_trigger_in_order() {
        let (tx, handle) = spawn_processor(Recorder::default());
        tx.send(entry(packet(PacketType::Session, 1))).unwrap();
        tx.send(entry(packet(PacketType::IAmAlive, 0))).unwrap();
        tx.send(entry(packet(PacketType::Test, 5))).unwrap();
        tx.send(entry(packet(PacketType::Trigger, 2))).unwrap();
        tx.send(entry(packet(PacketType::Session, 3))).unwrap();
        tx.send(QueueEntry::Shutdown).unwrap();

        let recorder = handle.await.unwrap();
        assert_eq!(recorder.seen, vec!["SESSION #1", "TRIGGER #2", "SESSION #3"]);
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_the_loop() {
        let recorder = Recorder {
            reject: Some("SESSION #2".to_string()),
            ..Default::default()
        };
        let (tx, handle) = spawn_processor(recorder);

        let mut unknown = packet(PacketType::Session, 7);
        unknown[..4].copy_from_slice(&77i32.to_be_bytes());

        tx.send(entry(vec![0u8; 12])).unwrap();
        tx.send(entry(unknown)).unwrap();
        tx.send(entry(packet(PacketType::Session, 2))).unwrap();
        tx.send(entry(packet(PacketType::Session, 4))).unwrap();
        tx.send(QueueEntry::Shutdown).unwrap();

        let recorder = handle.await.unwrap();
        assert_eq!(recorder.seen, vec!["SESSION #4"]);
    }

    #[tokio::test]
    async fn test_entries_after_sentinel_are_ignored() {
        let (tx, handle) = spawn_processor(Recorder::default());
        tx.send(QueueEntry::Shutdown).unwrap();
        tx.send(entry(packet(PacketType::Session, 1))).unwrap();

        let recorder = handle.await.unwrap();
        assert!(recorder.seen.is_empty());
    }

    #[tokio::test]
    async fn test_closed_queue_ends_processor() {
        let (tx, handle) = spawn_processor(Recorder::default());
        tx.send(entry(packet(PacketType::Trigger, 8))).unwrap();
        drop(tx);

        let recorder = handle.await.unwrap();
        assert_eq!(recorder.seen, vec!["TRIGGER #8"]);
    }

    #[test]
    fn test_process_reports_truncated_packet() {
        let mut processor = PacketProcessor::new(Recorder::default());
        let err = processor.process(&[1, 2, 3], peer()).unwrap_err();
        assert!(format!("{:?}", err).contains("truncated"));
    }
}
