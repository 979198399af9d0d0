//! Notification sender
//!
//! Fans a single packet out to every configured destination over persistent TCP
//! connections. Connections are opened lazily, reused across calls, and evicted
//! on any I/O error so the next call reconnects. Every non-KILL packet is
//! acknowledged by the peer echoing it back.

use std::collections::HashMap;
use std::time::Duration;

use eyre::{Context, Result};
use fcnwire::{Event, PACKET_SIZE, PacketType, unix_now};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::hosts::Destination;
use crate::serial::SerialNumber;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the send and the acknowledgement read
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeouts applied to each destination
#[derive(Debug, Clone, Copy)]
pub struct NotifierConfig {
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Owns the destination connection cache and the packet serial counter
///
/// Both are only touched through `&mut self`, so one notifier is one execution
/// context. Share it across tasks behind a mutex.
#[derive(Debug)]
pub struct Notifier {
    serials: SerialNumber,
    sockets: HashMap<Destination, TcpStream>,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(serials: SerialNumber) -> Self {
        Self::with_config(serials, NotifierConfig::default())
    }

    pub fn with_config(serials: SerialNumber, config: NotifierConfig) -> Self {
        Self {
            serials,
            sockets: HashMap::new(),
            config,
        }
    }

    /// Send one notification to every destination
    ///
    /// All destinations in the batch share one packet serial number. Returns how
    /// many destinations accepted the packet; unreachable or failing destinations
    /// are logged and skipped. A KILL closes every connection it used and resets
    /// the serial counter afterwards.
    pub async fn send(&mut self, destinations: &[Destination], packet_type: PacketType, event: &Event) -> Result<usize> {
        let packet_serial = self.serials.get();
        let packet = fcnwire::encode(packet_type, packet_serial, event)
            .with_context(|| format!("Cannot build {} packet", packet_type))?;
        debug!(%packet_type, packet_serial, count = destinations.len(), "Notifier::send: called");

        let is_kill = packet_type == PacketType::Kill;
        let mut reached = 0;

        for destination in destinations {
            let mut stream = match self.sockets.remove(destination) {
                Some(stream) => stream,
                None => match self.connect(destination).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(%destination, error = %e, "Cannot connect");
                        continue;
                    }
                },
            };

            match self.exchange(&mut stream, &packet, !is_kill).await {
                Ok(()) => {
                    reached += 1;
                    if !is_kill {
                        self.sockets.insert(destination.clone(), stream);
                    }
                }
                Err(e) => {
                    warn!(%destination, error = %e, "Cannot send");
                }
            }
        }

        if is_kill {
            debug!("Notifier::send: KILL sent, resetting serial numbers");
            if let Err(e) = self.serials.reset() {
                warn!(error = %e, "Failed to reset serial number after KILL");
            }
        }

        debug!(%packet_type, reached, "Notifier::send: done");
        Ok(reached)
    }

    /// Liveness packet with no payload
    pub async fn heartbeat(&mut self, destinations: &[Destination]) -> Result<usize> {
        let event = Event::new(0, unix_now(), 0.0, 0.0);
        self.send(destinations, PacketType::IAmAlive, &event).await
    }

    /// Tell every destination to drop its connection and restart numbering
    pub async fn kill(&mut self, destinations: &[Destination]) -> Result<usize> {
        let event = Event::new(0, unix_now(), 0.0, 0.0);
        let reached = self.send(destinations, PacketType::Kill, &event).await?;
        info!(reached, "KILL sent");
        Ok(reached)
    }

    pub fn is_connected(&self, destination: &Destination) -> bool {
        self.sockets.contains_key(destination)
    }

    pub fn connection_count(&self) -> usize {
        self.sockets.len()
    }

    /// Drop every cached connection
    pub fn close_all(&mut self) {
        debug!(count = self.sockets.len(), "Notifier::close_all: called");
        self.sockets.clear();
    }

    pub fn serials(&self) -> &SerialNumber {
        &self.serials
    }

    async fn connect(&self, destination: &Destination) -> Result<TcpStream> {
        debug!(%destination, "Notifier::connect: opening connection");
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(destination.addr()))
            .await
            .context("Connection timeout")?
            .context("Connection failed")?;
        stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
        Ok(stream)
    }

    async fn exchange(&self, stream: &mut TcpStream, packet: &[u8; PACKET_SIZE], await_ack: bool) -> Result<()> {
        tokio::time::timeout(self.config.ack_timeout, async {
            stream.write_all(packet).await.context("Failed to write packet")?;
            stream.flush().await.context("Failed to flush packet")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        if await_ack {
            let mut reply = [0u8; PACKET_SIZE];
            tokio::time::timeout(self.config.ack_timeout, stream.read_exact(&mut reply))
                .await
                .context("Acknowledgement timeout")?
                .context("Failed to read acknowledgement")?;
        }
        Ok(())
    }
}
