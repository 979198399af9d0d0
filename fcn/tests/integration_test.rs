//! Integration tests for FCN
//!
//! These tests run the sender, receiver and dispatcher against each other
//! over loopback TCP.

use std::time::Duration;

use eyre::Result;
use fcn::dispatch::{DispatchEngine, DispatchFilter, Dispatcher, NotifierSink, ScanEvent};
use fcn::hosts::Destination;
use fcn::receiver::{Notice, NoticeHandler, ReceiveLog, Receiver, ReceiverConfig, spawn_processor};
use fcn::sender::Notifier;
use fcn::serial::SerialNumber;
use fcnwire::{Event, PACKET_SIZE, PacketType};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Forwards every notice to the test
struct ChannelHandler(mpsc::UnboundedSender<Notice>);

impl NoticeHandler for ChannelHandler {
    fn handle(&mut self, notice: &Notice) -> Result<()> {
        self.0.send(notice.clone())?;
        Ok(())
    }
}

struct Partner {
    destination: Destination,
    notices: mpsc::UnboundedReceiver<Notice>,
    shutdown: mpsc::Sender<()>,
    receiver: JoinHandle<Result<()>>,
    processor: JoinHandle<ChannelHandler>,
}

async fn spawn_partner(log: Option<ReceiveLog>) -> Partner {
    let (notice_tx, notices) = mpsc::unbounded_channel();
    let (queue, processor) = spawn_processor(ChannelHandler(notice_tx));
    let config = ReceiverConfig {
        recv_timeout: Duration::from_millis(50),
        idle_limit: Duration::from_secs(60),
    };
    let mut receiver = Receiver::bind("127.0.0.1:0", queue, config).await.unwrap();
    if let Some(log) = log {
        receiver = receiver.with_receive_log(log);
    }
    let port = receiver.local_addr().unwrap().port();
    let (shutdown, shutdown_rx) = mpsc::channel(1);
    let receiver = tokio::spawn(receiver.run(shutdown_rx));

    Partner {
        destination: Destination::new("127.0.0.1", port),
        notices,
        shutdown,
        receiver,
        processor,
    }
}

impl Partner {
    async fn next_notice(&mut self) -> Notice {
        tokio::time::timeout(Duration::from_secs(5), self.notices.recv())
            .await
            .expect("timed out waiting for notice")
            .expect("processor stopped")
    }

    async fn stop(self) {
        self.shutdown.send(()).await.unwrap();
        self.receiver.await.unwrap().unwrap();
        self.processor.await.unwrap();
    }
}

fn unused_destination() -> Destination {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Destination::new("127.0.0.1", port)
}

#[tokio::test]
async fn test_session_fan_out_reaches_live_partners() {
    let temp = TempDir::new().unwrap();
    let log = ReceiveLog::new(temp.path().join("packets.log"));
    let mut first = spawn_partner(Some(log.clone())).await;
    let mut second = spawn_partner(None).await;
    let dead = unused_destination();

    let serials = SerialNumber::open(temp.path().join(".sn")).unwrap();
    let mut notifier = Notifier::new(serials);
    let destinations = vec![first.destination.clone(), dead.clone(), second.destination.clone()];

    let event = Event::new(1019, 1_445_980_000.0, 83.6331, 22.0145).with_extra(10800.0);
    let reached = notifier.send(&destinations, PacketType::Session, &event).await.unwrap();
    assert_eq!(reached, 2);
    assert!(!notifier.is_connected(&dead));

    for partner in [&mut first, &mut second] {
        let notice = partner.next_notice().await;
        assert_eq!(notice.packet_type, PacketType::Session);
        assert_eq!(notice.serial, 1);
        assert_eq!(notice.event_name, "SESSION #1019");
        assert!((notice.ra - 83.6331).abs() < 1e-4);
        assert!((notice.dec - 22.0145).abs() < 1e-4);
        assert_eq!(notice.extra, 10800);
        assert!(notice.is_session_start());
    }

    // Heartbeats are acknowledged but never reach the handler
    assert_eq!(notifier.heartbeat(&destinations).await.unwrap(), 2);

    let stop = Event::new(1019, 1_445_983_600.0, 83.6331, 22.0145).with_extra(0.0);
    assert_eq!(notifier.send(&destinations, PacketType::Session, &stop).await.unwrap(), 2);
    let notice = first.next_notice().await;
    assert_eq!(notice.serial, 3);
    assert!(notice.is_session_end());

    assert_eq!(notifier.kill(&destinations).await.unwrap(), 2);
    assert_eq!(notifier.connection_count(), 0);
    assert_eq!(notifier.serials().peek(), 1);

    // SESSION, IAMALIVE, SESSION, KILL
    let expected = (4 * PACKET_SIZE) as u64;
    let logged = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let len = std::fs::metadata(log.path()).map(|m| m.len()).unwrap_or(0);
            if len >= expected {
                return len;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("KILL never reached the receive log");
    assert_eq!(logged, expected);

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn test_partner_accepts_sender_again_after_kill() {
    let temp = TempDir::new().unwrap();
    let mut partner = spawn_partner(None).await;
    let destinations = vec![partner.destination.clone()];
    let mut notifier = Notifier::new(SerialNumber::open(temp.path().join(".sn")).unwrap());

    notifier.kill(&destinations).await.unwrap();

    let trigger = Event::new(77, 1_445_980_000.0, 10.0, -30.0).with_extra(557.0);
    assert_eq!(notifier.send(&destinations, PacketType::Trigger, &trigger).await.unwrap(), 1);
    let notice = partner.next_notice().await;
    assert_eq!(notice.event_name, "TRIGGER #77");
    assert_eq!(notice.serial, 1);
    assert_eq!(notice.extra, 557);

    partner.stop().await;
}

#[tokio::test]
async fn test_dispatcher_drives_partner_observation() {
    let temp = TempDir::new().unwrap();
    let mut partner = spawn_partner(None).await;
    let notifier = Notifier::new(SerialNumber::open(temp.path().join(".sn")).unwrap());
    let sink = NotifierSink::new(notifier, vec![partner.destination.clone()]);
    let engine = DispatchEngine::new(DispatchFilter::new("15B-378", "TARGET"));
    let mut dispatcher = Dispatcher::new(engine, Box::new(sink));

    let scan = |source: &str, intent: &str, start_time: f64| ScanEvent {
        project_id: "15B-378.sb31".to_string(),
        source: source.to_string(),
        scan_intent: intent.to_string(),
        ra: 82.9946,
        dec: 33.1479,
        start_time,
        scan: None,
    };

    let start = dispatcher
        .handle(&scan("FRB121102", "OBSERVE_TARGET", 1_445_980_000.0))
        .await
        .unwrap();
    assert!(dispatcher.handle(&scan("FRB121102", "OBSERVE_TARGET", 1_445_980_060.0)).await.is_none());
    let stop = dispatcher.handle(&scan("FINISH", "", 1_445_983_600.0)).await.unwrap();

    let begin = partner.next_notice().await;
    assert!(begin.is_session_start());
    assert_eq!(begin.event_id, start.event.serial);
    assert_eq!(begin.extra, 10800);

    let end = partner.next_notice().await;
    assert!(end.is_session_end());
    assert_eq!(end.event_id, stop.event.serial);
    assert_eq!(end.event_id, begin.event_id);

    partner.stop().await;
}
