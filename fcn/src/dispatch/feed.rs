//! Sources of scan events
//!
//! Scan metadata arrives as one JSON document per multicast datagram, or as
//! newline-delimited JSON when replaying a recorded session.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::engine::ScanEvent;

/// Largest datagram accepted from the multicast group
const MAX_DATAGRAM: usize = 65536;

#[async_trait]
pub trait ScanFeed: Send {
    /// Next scan event, `None` once the feed is exhausted
    async fn next_event(&mut self) -> Result<Option<ScanEvent>>;
}

/// Scan events from an IPv4 multicast group
pub struct MulticastFeed {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl MulticastFeed {
    /// Bind `port` on all interfaces and join `group`
    pub async fn join(group: Ipv4Addr, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .await
            .with_context(|| format!("Failed to bind multicast port {}", port))?;
        socket
            .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("Failed to join multicast group {}", group))?;
        info!(%group, port, "Joined multicast group");
        Ok(Self::from_socket(socket))
    }

    /// Read datagrams from an already bound socket
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM],
        }
    }
}

#[async_trait]
impl ScanFeed for MulticastFeed {
    async fn next_event(&mut self) -> Result<Option<ScanEvent>> {
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut self.buf)
                .await
                .context("Failed to receive datagram")?;
            match serde_json::from_slice::<ScanEvent>(&self.buf[..len]) {
                Ok(event) => {
                    debug!(%from, len, "MulticastFeed::next_event: decoded scan");
                    return Ok(Some(event));
                }
                Err(e) => warn!(%from, len, error = %e, "Cannot decode scan datagram, skipping"),
            }
        }
    }
}

type BoxedLines = Lines<Box<dyn AsyncBufRead + Unpin + Send>>;

/// Newline-delimited scan events from a file or stdin
pub struct LineFeed {
    lines: BoxedLines,
    line_no: usize,
}

impl LineFeed {
    pub fn new(reader: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        let reader: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(reader);
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Open `path`, or stdin when `path` is `-`
    pub async fn open(path: &Path) -> Result<Self> {
        if path.as_os_str() == "-" {
            debug!("LineFeed::open: reading stdin");
            return Ok(Self::new(BufReader::new(tokio::io::stdin())));
        }
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Cannot open events file '{}'", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

#[async_trait]
impl ScanFeed for LineFeed {
    async fn next_event(&mut self) -> Result<Option<ScanEvent>> {
        while let Some(line) = self.lines.next_line().await.context("Failed to read events")? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ScanEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => warn!(line = self.line_no, error = %e, "Cannot decode scan event, skipping"),
            }
        }
        Ok(None)
    }
}
