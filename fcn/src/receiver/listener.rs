//! Accept/receive state machine for the partner-side receiver
//!
//! One peer is served at a time. While connected, each receive waits up to
//! `recv_timeout` for a full packet; a peer that stays silent past
//! `idle_limit` is dropped so a new one can connect.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use eyre::{Context, Result, eyre};
use fcnwire::{PACKET_SIZE, PacketType, peek_type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::log::ReceiveLog;
use super::{InboundSender, QueueEntry};

/// Default per-receive timeout
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1800);

/// Default silence allowed before a peer is dropped
pub const DEFAULT_IDLE_LIMIT: Duration = Duration::from_secs(3600);

/// Pause after a failed step before trying again
const STEP_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct ReceiverConfig {
    pub recv_timeout: Duration,
    pub idle_limit: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            idle_limit: DEFAULT_IDLE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connected(SocketAddr),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connected(peer) => write!(f, "connected to {}", peer),
        }
    }
}

/// Result of a single [`Receiver::receive_one`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Packet acknowledged and queued for processing
    Queued,
    /// KILL received; the connection was closed
    Kill,
    /// No full packet before the receive timeout
    Timeout,
    /// Peer was silent past the idle limit and was dropped
    Reclaimed,
    /// Peer closed the connection or the read failed
    Disconnected,
    /// No peer to read from
    NotConnected,
}

/// The accepted peer plus any partial packet read so far
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buf: [u8; PACKET_SIZE],
    filled: usize,
}

pub struct Receiver {
    listener: Option<TcpListener>,
    conn: Option<Connection>,
    queue: InboundSender,
    receive_log: Option<ReceiveLog>,
    config: ReceiverConfig,
    last_packet: Instant,
}

impl Receiver {
    /// Bind the listening socket
    pub async fn bind(addr: impl ToSocketAddrs, queue: InboundSender, config: ReceiverConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context("Failed to bind listening socket")?;
        debug!(addr = ?listener.local_addr().ok(), ?config, "Receiver::bind: listening");
        Ok(Self {
            listener: Some(listener),
            conn: None,
            queue,
            receive_log: None,
            config,
            last_packet: Instant::now(),
        })
    }

    /// Record every accepted packet in `log`
    pub fn with_receive_log(mut self, log: ReceiveLog) -> Self {
        self.receive_log = Some(log);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let listener = self.listener.as_ref().ok_or_else(|| eyre!("Receiver is stopped"))?;
        listener.local_addr().context("Failed to read local address")
    }

    pub fn state(&self) -> ConnectionState {
        match &self.conn {
            Some(conn) => ConnectionState::Connected(conn.peer),
            None => ConnectionState::Idle,
        }
    }

    /// Accept a peer if none is connected, waiting until one arrives
    pub async fn accept_if_waiting(&mut self) -> Result<ConnectionState> {
        if self.conn.is_some() {
            return Ok(self.state());
        }
        let listener = self.listener.as_ref().ok_or_else(|| eyre!("Receiver is stopped"))?;
        let (stream, peer) = listener.accept().await.context("Failed to accept connection")?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Receiver::accept_if_waiting: cannot set TCP_NODELAY");
        }
        info!(%peer, "Accepted connection");

        self.conn = Some(Connection {
            stream,
            peer,
            buf: [0u8; PACKET_SIZE],
            filled: 0,
        });
        self.last_packet = Instant::now();
        Ok(self.state())
    }

    /// Read one packet from the connected peer
    ///
    /// Partial reads survive a timeout; the next call continues filling the
    /// same packet.
    pub async fn receive_one(&mut self) -> Result<ReceiveOutcome> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(ReceiveOutcome::NotConnected);
        };

        let read = tokio::time::timeout(self.config.recv_timeout, async {
            while conn.filled < PACKET_SIZE {
                let n = conn.stream.read(&mut conn.buf[conn.filled..]).await?;
                if n == 0 {
                    return Ok(false);
                }
                conn.filled += n;
            }
            Ok::<_, std::io::Error>(true)
        })
        .await;

        match read {
            Err(_) => {
                let idle = self.last_packet.elapsed();
                if idle > self.config.idle_limit {
                    info!(peer = %conn.peer, idle_secs = idle.as_secs(), "Peer idle too long, closing connection");
                    self.close();
                    Ok(ReceiveOutcome::Reclaimed)
                } else {
                    debug!(peer = %conn.peer, "Receiver::receive_one: timed out");
                    Ok(ReceiveOutcome::Timeout)
                }
            }
            Ok(Err(e)) => {
                warn!(peer = %conn.peer, error = %e, "Receive failed, closing connection");
                self.close();
                Ok(ReceiveOutcome::Disconnected)
            }
            Ok(Ok(false)) => {
                info!(peer = %conn.peer, "Peer closed connection");
                self.close();
                Ok(ReceiveOutcome::Disconnected)
            }
            Ok(Ok(true)) => {
                let data = conn.buf.to_vec();
                conn.filled = 0;
                self.accept_packet(data).await
            }
        }
    }

    async fn accept_packet(&mut self, data: Vec<u8>) -> Result<ReceiveOutcome> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(ReceiveOutcome::NotConnected);
        };
        let peer = conn.peer;
        self.last_packet = Instant::now();
        let is_kill = peek_type(&data) == Some(PacketType::Kill.code());

        if let Some(log) = &self.receive_log {
            if let Err(e) = log.append(&data) {
                warn!(error = ?e, "Failed to append to receive log");
            }
        }

        if is_kill {
            info!(%peer, "KILL received, closing connection");
            self.close();
            return Ok(ReceiveOutcome::Kill);
        }

        let ack = tokio::time::timeout(self.config.recv_timeout, conn.stream.write_all(&data)).await;
        match ack {
            Ok(Ok(())) => debug!(%peer, "Receiver::accept_packet: echoed packet"),
            Ok(Err(e)) => warn!(%peer, error = %e, "Failed to acknowledge packet"),
            Err(_) => warn!(%peer, "Timed out acknowledging packet"),
        }

        self.queue
            .send(QueueEntry::Packet { data, peer })
            .map_err(|_| eyre!("Packet processor has stopped"))?;
        Ok(ReceiveOutcome::Queued)
    }

    /// One turn of the accept/receive loop
    pub async fn step(&mut self) -> Result<()> {
        match self.state() {
            ConnectionState::Idle => {
                self.accept_if_waiting().await?;
            }
            ConnectionState::Connected(_) => {
                let outcome = self.receive_one().await?;
                debug!(?outcome, "Receiver::step");
            }
        }
        Ok(())
    }

    /// Serve peers until `shutdown_rx` fires, then stop
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!(addr = ?self.local_addr().ok(), "Receiver starting");
        loop {
            tokio::select! {
                result = self.step() => {
                    if let Err(e) = result {
                        warn!(error = ?e, "Receiver step failed");
                        if self.queue.is_closed() {
                            self.stop();
                            return Err(e);
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(STEP_RETRY_DELAY) => {}
                            _ = shutdown_rx.recv() => {
                                debug!("Receiver::run: shutdown signal received");
                                break;
                            }
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    debug!("Receiver::run: shutdown signal received");
                    break;
                }
            }
        }
        self.stop();
        info!("Receiver stopped");
        Ok(())
    }

    /// Signal the processor to exit and close every socket
    pub fn stop(&mut self) {
        debug!(state = %self.state(), "Receiver::stop: called");
        if self.queue.send(QueueEntry::Shutdown).is_err() {
            debug!("Receiver::stop: processor already gone");
        }
        self.close();
        self.listener = None;
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(peer = %conn.peer, "Receiver::close: dropping connection");
        }
    }
}
