//! Scan-driven dispatcher
//!
//! Reads scan events from a [`ScanFeed`], asks the [`DispatchEngine`] whether
//! each one warrants a start or stop notice, and forwards the resulting
//! commands to a [`CommandSink`]. Without a sink the dispatcher only listens
//! and logs its decisions.

use chrono::Utc;
use eyre::Result;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub mod engine;
pub mod feed;
pub mod sink;

pub use engine::{
    DEFAULT_MAX_SESSION_SECS, DispatchEngine, DispatchFilter, FINISH_SOURCE, PendingObservation, ScanEvent,
    event_serial_from,
};
pub use feed::{LineFeed, MulticastFeed, ScanFeed};
pub use sink::{CommandSink, HandoffSink, NotifierSink};

use crate::handoff::Command;
use crate::server::DEFAULT_HEARTBEAT_INTERVAL;

pub struct Dispatcher {
    engine: DispatchEngine,
    sink: Option<Box<dyn CommandSink>>,
}

impl Dispatcher {
    /// Dispatch decisions to `sink`
    pub fn new(engine: DispatchEngine, sink: Box<dyn CommandSink>) -> Self {
        Self {
            engine,
            sink: Some(sink),
        }
    }

    /// Log decisions without acting on them
    pub fn listening(engine: DispatchEngine) -> Self {
        Self { engine, sink: None }
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub fn is_dispatching(&self) -> bool {
        self.sink.is_some()
    }

    /// Handle one scan event, returning the command it produced
    ///
    /// A sink failure is logged; the decision itself stands.
    pub async fn handle(&mut self, event: &ScanEvent) -> Option<Command> {
        let command = self.engine.process(event, Utc::now())?;
        self.dispatch(&command).await;
        Some(command)
    }

    async fn dispatch(&mut self, command: &Command) {
        match self.sink.as_mut() {
            Some(sink) => {
                if let Err(e) = sink.submit(command).await {
                    error!(%command, error = ?e, "Failed to dispatch command");
                }
            }
            None => info!(%command, "Listening mode, not dispatching"),
        }
    }

    /// Consume `feed` until it ends or `shutdown_rx` fires, then close the sink
    ///
    /// Shutdown also interrupts a command still waiting in the sink; that
    /// command is abandoned.
    pub async fn run(&mut self, feed: &mut dyn ScanFeed, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let filter = self.engine.filter();
        info!(
            project = %filter.project,
            intent = %filter.intent,
            dispatching = self.is_dispatching(),
            "Dispatcher is now running"
        );

        let heartbeat_period = self.sink.as_ref().and_then(|sink| sink.heartbeat_interval());
        let mut heartbeat = tokio::time::interval(heartbeat_period.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                next = feed.next_event() => {
                    let event = match next {
                        Ok(Some(event)) => event,
                        Ok(None) => {
                            debug!("Dispatcher::run: feed exhausted");
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    };
                    if let Some(command) = self.engine.process(&event, Utc::now()) {
                        tokio::select! {
                            _ = self.dispatch(&command) => {}
                            _ = shutdown_rx.recv() => {
                                warn!(%command, "Shutdown while dispatching, command abandoned");
                                break Ok(());
                            }
                        }
                    }
                }

                _ = heartbeat.tick(), if heartbeat_period.is_some() => {
                    if let Some(sink) = self.sink.as_mut() {
                        if let Err(e) = sink.heartbeat().await {
                            warn!(error = ?e, "Heartbeat failed");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    debug!("Dispatcher::run: shutdown signal received");
                    break Ok(());
                }
            }
        };

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.close().await {
                warn!(error = ?e, "Failed to close command sink");
            }
        }
        info!(pending = self.engine.pending_count(), "Dispatcher stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::CommandSlot;
    use crate::hosts::Destination;
    use crate::sender::Notifier;
    use crate::serial::SerialNumber;
    use fcnwire::{PACKET_SIZE, PacketType, decode};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn events() -> String {
        [
            r#"{"projectId":"15B-378","source":"3C147","scanIntent":"CALIBRATE_FLUX","ra":85.65,"dec":49.85,"startTime":1445256000}"#,
            r#"{"projectId":"15B-378","source":"FRB121102","scanIntent":"OBSERVE_TARGET","ra":82.99,"dec":33.14,"startTime":1445256100}"#,
            r#"{"projectId":"15B-378","source":"FRB121102","scanIntent":"OBSERVE_TARGET","ra":82.99,"dec":33.14,"startTime":1445256200}"#,
            r#"{"projectId":"15B-378","source":"FINISH","scanIntent":"","ra":0,"dec":0,"startTime":1445259600}"#,
        ]
        .join("\n")
    }

    fn feed() -> LineFeed {
        LineFeed::new(BufReader::new(std::io::Cursor::new(events().into_bytes())))
    }

    fn filter() -> DispatchFilter {
        DispatchFilter::new("15B-378", "TARGET")
    }

    #[tokio::test]
    async fn test_listening_mode_decides_without_sending() {
        let mut dispatcher = Dispatcher::listening(DispatchEngine::new(filter()));
        let (_tx, rx) = mpsc::channel(1);
        dispatcher.run(&mut feed(), rx).await.unwrap();
        assert!(!dispatcher.is_dispatching());
        assert_eq!(dispatcher.engine().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatches_start_then_stop_through_handoff() {
        let temp = TempDir::new().unwrap();
        let slot = CommandSlot::new(temp.path().join("incoming.cmd"));
        let sink = HandoffSink::new(slot.clone(), Duration::from_millis(10));
        let mut dispatcher = Dispatcher::new(DispatchEngine::new(filter()), Box::new(sink));
        let mut feed = feed();

        let mut commands = Vec::new();
        while let Some(event) = feed.next_event().await.unwrap() {
            if let Some(command) = dispatcher.handle(&event).await {
                commands.push(command.clone());
                assert_eq!(slot.take().await.unwrap(), Some(command));
            }
        }

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].event.extra, Some(DEFAULT_MAX_SESSION_SECS as f64));
        assert_eq!(commands[1].event.extra, Some(0.0));
        assert_eq!(commands[0].event.serial, commands[1].event.serial);
    }

    const TARGET_SCAN: &str = r#"{"projectId":"15B-378","source":"FRB121102","scanIntent":"OBSERVE_TARGET","ra":82.99,"dec":33.14,"startTime":1445256100}"#;

    /// Echoing partner that reports each packet's type and serial
    async fn spawn_partner() -> (Destination, mpsc::UnboundedReceiver<(PacketType, i32)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; PACKET_SIZE];
            while stream.read_exact(&mut buf).await.is_ok() {
                let n = decode(&buf).unwrap();
                let packet_type = n.packet_type.unwrap();
                let _ = tx.send((packet_type, n.serial));
                if packet_type == PacketType::Kill || stream.write_all(&buf).await.is_err() {
                    break;
                }
            }
        });
        (Destination::new("127.0.0.1", port), rx)
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait_on_busy_slot() {
        let temp = TempDir::new().unwrap();
        let slot = CommandSlot::new(temp.path().join("incoming.cmd"));
        std::fs::write(slot.path(), "TEST 1 0 0 0").unwrap();

        let sink = HandoffSink::new(slot.clone(), Duration::from_millis(10));
        let mut dispatcher = Dispatcher::new(DispatchEngine::new(filter()), Box::new(sink));
        let mut feed = LineFeed::new(BufReader::new(std::io::Cursor::new(TARGET_SCAN.as_bytes().to_vec())));
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { dispatcher.run(&mut feed, rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatcher kept waiting after shutdown")
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read_to_string(slot.path()).unwrap(), "TEST 1 0 0 0");
    }

    #[tokio::test]
    async fn test_direct_dispatch_heartbeats_then_kills() {
        let temp = TempDir::new().unwrap();
        let (partner, mut packets) = spawn_partner().await;
        let serials = SerialNumber::open(temp.path().join(".sn")).unwrap();
        let sink = NotifierSink::new(Notifier::new(serials), vec![partner])
            .with_heartbeat_interval(Duration::from_millis(50));
        let mut dispatcher = Dispatcher::new(DispatchEngine::new(filter()), Box::new(sink));

        // A feed that stays open but never produces a scan
        let (_writer, reader) = tokio::io::duplex(64);
        let mut feed = LineFeed::new(BufReader::new(reader));
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { dispatcher.run(&mut feed, rx).await });

        assert_eq!(packets.recv().await, Some((PacketType::IAmAlive, 1)));
        assert_eq!(packets.recv().await, Some((PacketType::IAmAlive, 2)));

        tx.send(()).await.unwrap();
        handle.await.unwrap().unwrap();

        let mut last = None;
        while let Some((packet_type, serial)) = packets.recv().await {
            if packet_type == PacketType::Kill {
                last = Some(serial);
                break;
            }
            assert_eq!(packet_type, PacketType::IAmAlive);
        }
        assert!(last.is_some_and(|serial| serial >= 3));
        assert_eq!(SerialNumber::open(temp.path().join(".sn")).unwrap().peek(), 1);
    }
}
