//! Notification server loop
//!
//! Polls the hand-off slot for a pending command and sends it to every
//! destination, heartbeats all destinations on a fixed cadence, and broadcasts
//! KILL on the way out.

use std::time::Duration;

use eyre::Result;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::handoff::CommandSlot;
use crate::hosts::Destination;
use crate::sender::Notifier;

/// Default liveness cadence
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Default hand-off polling cadence
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct Server {
    notifier: Notifier,
    destinations: Vec<Destination>,
    slot: CommandSlot,
    config: ServerConfig,
}

impl Server {
    pub fn new(notifier: Notifier, destinations: Vec<Destination>, slot: CommandSlot, config: ServerConfig) -> Self {
        Self {
            notifier,
            destinations,
            slot,
            config,
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Send the pending command, if any; returns how many destinations took it
    pub async fn poll_once(&mut self) -> Result<Option<usize>> {
        let Some(command) = self.slot.take().await? else {
            return Ok(None);
        };
        info!(%command, "Found command");
        let reached = self
            .notifier
            .send(&self.destinations, command.packet_type, &command.event)
            .await?;
        info!(
            packet_type = %command.packet_type,
            reached,
            total = self.destinations.len(),
            "Notification sent"
        );
        Ok(Some(reached))
    }

    pub async fn heartbeat(&mut self) -> Result<usize> {
        let reached = self.notifier.heartbeat(&self.destinations).await?;
        debug!(reached, "Server::heartbeat: IAMALIVE sent");
        Ok(reached)
    }

    /// Serve until `shutdown_rx` fires, then KILL every destination
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<Notifier> {
        info!(
            destinations = self.destinations.len(),
            command_file = %self.slot.path().display(),
            "Server starting"
        );

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!(error = ?e, "Heartbeat failed");
                    }
                }

                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = ?e, "Failed to process command");
                    }
                }

                _ = shutdown_rx.recv() => {
                    debug!("Server::run: shutdown signal received");
                    break;
                }
            }
        }

        info!("Sending KILL to all destinations");
        if let Err(e) = self.notifier.kill(&self.destinations).await {
            warn!(error = ?e, "Failed to send KILL");
        }
        self.notifier.close_all();
        info!("Server stopped");
        Ok(self.notifier)
    }
}
