//! Pending-command hand-off
//!
//! A single outstanding command travels between processes as a one-line file:
//!
//! ```text
//! TYPE SERIAL TIME RA DEC [EXTRA]
//! SESSION 1019120000 1445980000.000000 83.633100 22.014500 10800
//! ```
//!
//! The producer waits for the slot to be empty before writing, and the consumer
//! claims the file before reading it, so at most one command is ever pending.
//! An absent file is the normal idle state.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use eyre::{Context, Result};
use fcnwire::{Event, PacketType, WireError};
use thiserror::Error;
use tracing::debug;

/// Producer poll interval while waiting for the slot to clear
pub const DEFAULT_CLEAR_POLL: Duration = Duration::from_secs(1);

/// Errors parsing a hand-off line
#[derive(Debug, Error, PartialEq)]
pub enum HandoffError {
    #[error("Empty command")]
    Empty,

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid {field} '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error(transparent)]
    UnknownType(#[from] WireError),

    #[error("{0} commands require a duration or DM field")]
    MissingExtra(PacketType),
}

/// A notification request waiting to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub packet_type: PacketType,
    pub event: Event,
}

impl Command {
    pub fn new(packet_type: PacketType, event: Event) -> Self {
        Self { packet_type, event }
    }

    /// SESSION start (duration > 0) or stop (duration <= 0)
    pub fn session(serial: i32, time: f64, ra: f64, dec: f64, duration: f64) -> Self {
        Self::new(
            PacketType::Session,
            Event::new(serial, time, ra, dec).with_extra(duration),
        )
    }

    fn requires_extra(&self) -> bool {
        matches!(self.packet_type, PacketType::Session | PacketType::Trigger)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = &self.event;
        write!(
            f,
            "{} {} {:.6} {:.6} {:.6}",
            self.packet_type, e.serial, e.time, e.ra, e.dec
        )?;
        if let Some(extra) = e.extra {
            write!(f, " {}", extra)?;
        }
        Ok(())
    }
}

impl FromStr for Command {
    type Err = HandoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let packet_type: PacketType = fields.next().ok_or(HandoffError::Empty)?.parse()?;
        let serial = number::<i32>(fields.next(), "serial")?;
        let time = number::<f64>(fields.next(), "time")?;
        let ra = number::<f64>(fields.next(), "ra")?;
        let dec = number::<f64>(fields.next(), "dec")?;
        let extra = fields.next().map(|v| number::<f64>(Some(v), "extra")).transpose()?;

        let mut event = Event::new(serial, time, ra, dec);
        event.extra = extra;
        let command = Self::new(packet_type, event);
        if command.requires_extra() && command.event.extra.is_none() {
            return Err(HandoffError::MissingExtra(packet_type));
        }
        Ok(command)
    }
}

fn number<T: FromStr>(field: Option<&str>, name: &'static str) -> Result<T, HandoffError> {
    let value = field.ok_or(HandoffError::MissingField(name))?;
    value.parse().map_err(|_| HandoffError::InvalidField {
        field: name,
        value: value.to_string(),
    })
}

/// The single-slot command file shared by a producer and the server
#[derive(Debug, Clone)]
pub struct CommandSlot {
    path: PathBuf,
}

impl CommandSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_clear(&self) -> bool {
        !self.path.exists()
    }

    /// Claim and parse the pending command, if there is one
    ///
    /// The file is renamed away before it is read, so a command is consumed
    /// exactly once even if it fails to parse.
    pub async fn take(&self) -> Result<Option<Command>> {
        let claimed = self.sibling("claimed");
        match tokio::fs::rename(&self.path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to claim command file"),
        }

        let contents = tokio::fs::read_to_string(&claimed).await;
        tokio::fs::remove_file(&claimed)
            .await
            .context("Failed to remove claimed command file")?;
        let contents = contents.context("Failed to read command file")?;
        debug!(path = ?self.path, line = contents.trim(), "CommandSlot::take: claimed command");

        let command = contents
            .parse::<Command>()
            .with_context(|| format!("Bad command '{}'", contents.trim()))?;
        Ok(Some(command))
    }

    /// Wait for the slot to clear, then publish `command`
    pub async fn put(&self, command: &Command, poll: Duration) -> Result<()> {
        while !self.is_clear() {
            debug!(path = ?self.path, "CommandSlot::put: waiting for slot to clear");
            tokio::time::sleep(poll).await;
        }

        let staged = self.sibling("tmp");
        tokio::fs::write(&staged, command.to_string())
            .await
            .context("Failed to write command file")?;
        tokio::fs::rename(&staged, &self.path)
            .await
            .context("Failed to publish command file")?;
        debug!(path = ?self.path, %command, "CommandSlot::put: command queued");
        Ok(())
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}
