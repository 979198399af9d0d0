//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fcnwire::PacketType;

/// FCN - FRB Coordination Network notifications
#[derive(Parser)]
#[command(
    name = "fcn",
    about = "Coordinate transient observations with partner telescopes",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send queued commands and heartbeats to every partner
    Server {
        /// Destinations file, one `<ip> <port>` per line
        #[arg(long)]
        hosts_file: Option<PathBuf>,

        /// Pending-command hand-off file
        #[arg(long)]
        command_file: Option<PathBuf>,
    },

    /// Receive notifications as a partner
    Client {
        /// Address to listen on
        host: String,

        /// Port to listen on
        port: u16,

        /// Append raw packets to this file
        #[arg(long)]
        receive_log: Option<PathBuf>,
    },

    /// Queue a command for the server
    #[command(allow_negative_numbers = true)]
    Queue {
        /// TEST, SESSION or TRIGGER
        #[arg(value_name = "TYPE", value_parser = parse_queue_type)]
        packet_type: PacketType,

        /// Event number
        id: i32,

        /// Event time in UNIX seconds, 0 for now
        time: f64,

        /// Right ascension, degrees
        ra: f64,

        /// Declination, degrees
        dec: f64,

        /// Duration in seconds (SESSION) or DM (TRIGGER)
        extra: Option<f64>,

        /// Pending-command hand-off file
        #[arg(long)]
        command_file: Option<PathBuf>,
    },

    /// Watch scan events and dispatch start/stop notices
    Dispatch {
        /// Trigger on this project substring
        #[arg(short, long)]
        project: Option<String>,

        /// Trigger on this intent substring
        #[arg(short, long)]
        intent: Option<String>,

        /// Actually dispatch commands instead of just listening
        #[arg(short, long)]
        dispatch: bool,

        /// Read newline-delimited JSON events from a file (`-` for stdin) instead of multicast
        #[arg(short, long)]
        events: Option<PathBuf>,

        /// Send straight to the hosts file instead of the hand-off file
        #[arg(long)]
        direct: bool,
    },
}

/// Packet types an operator may queue by hand
fn parse_queue_type(s: &str) -> Result<PacketType, String> {
    let packet_type: PacketType = s.parse().map_err(|e| format!("{}", e))?;
    match packet_type {
        PacketType::Test | PacketType::Session | PacketType::Trigger => Ok(packet_type),
        other => Err(format!("{} cannot be queued", other)),
    }
}
