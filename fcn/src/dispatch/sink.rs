//! Where dispatch decisions go

use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, bail};
use tracing::{debug, info};

use crate::handoff::{Command, CommandSlot};
use crate::hosts::Destination;
use crate::sender::Notifier;
use crate::server::DEFAULT_HEARTBEAT_INTERVAL;

#[async_trait]
pub trait CommandSink: Send {
    async fn submit(&mut self, command: &Command) -> Result<()>;

    /// Liveness cadence, for sinks that own partner connections
    fn heartbeat_interval(&self) -> Option<Duration> {
        None
    }

    async fn heartbeat(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the dispatcher stops
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Queue commands in the hand-off file for a separate server process
pub struct HandoffSink {
    slot: CommandSlot,
    poll: Duration,
}

impl HandoffSink {
    pub fn new(slot: CommandSlot, poll: Duration) -> Self {
        Self { slot, poll }
    }
}

#[async_trait]
impl CommandSink for HandoffSink {
    async fn submit(&mut self, command: &Command) -> Result<()> {
        debug!(%command, path = ?self.slot.path(), "HandoffSink::submit: called");
        self.slot.put(command, self.poll).await?;
        info!(%command, "Command queued for server");
        Ok(())
    }
}

/// Send commands straight to the partners
///
/// The sink owns the partner connections, so it heartbeats them and sends
/// KILL when closed, as the server would.
pub struct NotifierSink {
    notifier: Notifier,
    destinations: Vec<Destination>,
    heartbeat_interval: Duration,
}

impl NotifierSink {
    pub fn new(notifier: Notifier, destinations: Vec<Destination>) -> Self {
        Self {
            notifier,
            destinations,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.notifier
    }
}

#[async_trait]
impl CommandSink for NotifierSink {
    async fn submit(&mut self, command: &Command) -> Result<()> {
        let reached = self
            .notifier
            .send(&self.destinations, command.packet_type, &command.event)
            .await?;
        info!(%command, reached, total = self.destinations.len(), "Command sent");
        if reached == 0 && !self.destinations.is_empty() {
            bail!("No destination accepted {}", command.packet_type);
        }
        Ok(())
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        Some(self.heartbeat_interval)
    }

    async fn heartbeat(&mut self) -> Result<()> {
        let reached = self.notifier.heartbeat(&self.destinations).await?;
        debug!(reached, "NotifierSink::heartbeat: IAMALIVE sent");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let result = self.notifier.kill(&self.destinations).await;
        self.notifier.close_all();
        result.map(|_| ())
    }
}
