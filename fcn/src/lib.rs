//! FCN - FRB Coordination Network
//!
//! Coordinates transient observations between the VLA and partner
//! observatories by exchanging fixed 160-byte notices over TCP.
//!
//! # Roles
//!
//! - **Server**: picks up a pending command from the hand-off file, fans it out
//!   to every partner, heartbeats them every minute and sends KILL on exit.
//! - **Client**: the partner side; accepts one peer at a time, acknowledges
//!   each packet by echoing it and processes notices in the background.
//! - **Dispatcher**: watches scan events and decides when an observation
//!   should start or stop, at most once per target.
//!
//! # Modules
//!
//! - [`serial`] - Persistent packet serial numbers
//! - [`sender`] - Multi-destination notification sender
//! - [`server`] - Hand-off polling and heartbeat loop
//! - [`receiver`] - Accept/receive state machine and background processor
//! - [`dispatch`] - Scan-driven decision engine, feeds and sinks
//! - [`handoff`] - Single-slot pending-command file
//! - [`hosts`] - Destination list
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod handoff;
pub mod hosts;
pub mod receiver;
pub mod sender;
pub mod serial;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DispatchEngine, DispatchFilter, Dispatcher, ScanEvent};
pub use handoff::{Command, CommandSlot, HandoffError};
pub use hosts::{Destination, load_hosts};
pub use receiver::{LoggingHandler, Notice, NoticeHandler, Receiver, ReceiverConfig, spawn_processor};
pub use sender::{Notifier, NotifierConfig};
pub use serial::SerialNumber;
pub use server::{Server, ServerConfig};
