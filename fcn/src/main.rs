//! FCN - FRB Coordination Network
//!
//! CLI entry point for the notification server, the partner receiver, the
//! command queueing tool and the scan dispatcher.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fcn::cli::{Cli, Command as CliCommand};
use fcn::config::Config;
use fcn::dispatch::{
    CommandSink, DispatchEngine, DispatchFilter, Dispatcher, HandoffSink, LineFeed, MulticastFeed, NotifierSink,
    ScanFeed,
};
use fcn::handoff::{Command, CommandSlot, DEFAULT_CLEAR_POLL, HandoffError};
use fcn::hosts::load_hosts;
use fcn::receiver::{LoggingHandler, ReceiveLog, Receiver, spawn_processor};
use fcn::sender::Notifier;
use fcn::serial::SerialNumber;
use fcn::server::Server;
use fcnwire::{Event, PacketType, mjd_mpm, unix_now};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("Failed to open log file")?;
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Version, PID and the current MJD/MPM, as every FCN tool reports on startup
fn log_banner(role: &str) {
    let (mjd, mpm) = mjd_mpm(Utc::now());
    info!("Starting fcn {} {} with PID {}", role, env!("CARGO_PKG_VERSION"), std::process::id());
    info!("Current MJD: {}", mjd);
    info!("Current MPM: {}", mpm);
    info!("All dates and times are in UTC except where noted");
}

/// Block until SIGINT or SIGTERM
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(
        cli.log_level.as_deref(),
        config.log_level.as_deref(),
        config.log_file.as_deref(),
    )
    .context("Failed to setup logging")?;

    match Config::locate(cli.config.as_ref()) {
        Some(path) => info!("Loaded config from: {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        CliCommand::Server {
            hosts_file,
            command_file,
        } => {
            let hosts_file = hosts_file.unwrap_or_else(|| config.server.hosts_file.clone());
            let command_file = command_file.unwrap_or_else(|| config.server.command_file.clone());
            cmd_server(&config, &hosts_file, command_file).await
        }
        CliCommand::Client {
            host,
            port,
            receive_log,
        } => {
            let receive_log = receive_log.unwrap_or_else(|| config.client.receive_log.clone());
            cmd_client(&config, &host, port, receive_log).await
        }
        CliCommand::Queue {
            packet_type,
            id,
            time,
            ra,
            dec,
            extra,
            command_file,
        } => {
            let command_file = command_file.unwrap_or_else(|| config.server.command_file.clone());
            let time = if time == 0.0 { unix_now() } else { time };
            let mut event = Event::new(id, time, ra, dec);
            event.extra = extra;
            cmd_queue(Command::new(packet_type, event), command_file).await
        }
        CliCommand::Dispatch {
            project,
            intent,
            dispatch,
            events,
            direct,
        } => {
            let filter = DispatchFilter::new(
                project.unwrap_or_else(|| config.dispatch.project.clone()),
                intent.unwrap_or_else(|| config.dispatch.intent.clone()),
            );
            cmd_dispatch(&config, filter, dispatch, events, direct).await
        }
    }
}

/// Notification server: hand-off polling, heartbeats, KILL on exit
async fn cmd_server(config: &Config, hosts_file: &Path, command_file: PathBuf) -> Result<()> {
    debug!(?hosts_file, ?command_file, "cmd_server: called");
    log_banner("server");

    let destinations = load_hosts(hosts_file)?;
    if destinations.is_empty() {
        warn!(path = %hosts_file.display(), "No destinations in hosts file");
    }
    for destination in &destinations {
        info!(%destination, "Destination");
    }

    let serials = SerialNumber::open(&config.server.serial_file)?;
    info!(next = serials.peek(), path = %serials.path().display(), "Serial numbers loaded");
    let notifier = Notifier::with_config(serials, config.server.notifier_config());
    let server = Server::new(
        notifier,
        destinations,
        CommandSlot::new(command_file),
        config.server.server_config(),
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let handle = tokio::spawn(server.run(shutdown_rx));
    info!("Server running. Press Ctrl+C to stop.");

    wait_for_signal().await?;
    let _ = shutdown_tx.send(()).await;
    handle.await.context("Server task failed")??;
    info!("Server shut down");
    Ok(())
}

/// Partner receiver: accept loop plus background notice processing
async fn cmd_client(config: &Config, host: &str, port: u16, receive_log: PathBuf) -> Result<()> {
    debug!(%host, port, ?receive_log, "cmd_client: called");
    log_banner("client");

    let (queue, processor) = spawn_processor(LoggingHandler);
    let receiver = Receiver::bind((host, port), queue, config.client.receiver_config())
        .await
        .with_context(|| format!("Cannot listen on {}:{}", host, port))?
        .with_receive_log(ReceiveLog::new(&receive_log));
    info!(%host, port, receive_log = %receive_log.display(), "Waiting for notices");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let handle = tokio::spawn(receiver.run(shutdown_rx));

    wait_for_signal().await?;
    let _ = shutdown_tx.send(()).await;
    handle.await.context("Receiver task failed")??;
    processor.await.context("Packet processor failed")?;
    info!("Client shut down");
    Ok(())
}

/// Write one command into the hand-off slot
async fn cmd_queue(command: Command, command_file: PathBuf) -> Result<()> {
    debug!(%command, ?command_file, "cmd_queue: called");
    if matches!(command.packet_type, PacketType::Session | PacketType::Trigger) && command.event.extra.is_none() {
        bail!(HandoffError::MissingExtra(command.packet_type));
    }

    let slot = CommandSlot::new(command_file);
    if !slot.is_clear() {
        println!(
            "{} Waiting for {} to clear...",
            "…".yellow(),
            slot.path().display()
        );
    }
    slot.put(&command, DEFAULT_CLEAR_POLL).await?;
    println!("{} Queued: {}", "✓".green(), command.to_string().cyan());
    Ok(())
}

/// Scan dispatcher, listening only unless `dispatch` is set
async fn cmd_dispatch(
    config: &Config,
    filter: DispatchFilter,
    dispatch: bool,
    events: Option<PathBuf>,
    direct: bool,
) -> Result<()> {
    debug!(?filter, dispatch, ?events, direct, "cmd_dispatch: called");
    log_banner("dispatcher");
    info!(
        "Looking for intent = '{}', project = '{}'",
        filter.intent, filter.project
    );

    let engine = DispatchEngine::with_max_session(filter, config.dispatch.max_session_secs);
    let mut dispatcher = if dispatch {
        info!("Running in dispatch mode. Will dispatch obs commands.");
        let sink: Box<dyn CommandSink> = if direct {
            let destinations = load_hosts(&config.server.hosts_file)?;
            let serials = SerialNumber::open(&config.server.serial_file)?;
            Box::new(
                NotifierSink::new(
                    Notifier::with_config(serials, config.server.notifier_config()),
                    destinations,
                )
                .with_heartbeat_interval(config.server.server_config().heartbeat_interval),
            )
        } else {
            Box::new(HandoffSink::new(
                CommandSlot::new(&config.dispatch.command_file),
                DEFAULT_CLEAR_POLL,
            ))
        };
        Dispatcher::new(engine, sink)
    } else {
        info!("Running in listening mode. Will not dispatch obs commands.");
        Dispatcher::listening(engine)
    };

    let mut feed: Box<dyn ScanFeed> = match events {
        Some(path) => Box::new(LineFeed::open(&path).await?),
        None => Box::new(
            MulticastFeed::join(config.dispatch.multicast_group, config.dispatch.multicast_port).await?,
        ),
    };

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let mut handle = tokio::spawn(async move { dispatcher.run(feed.as_mut(), shutdown_rx).await });

    tokio::select! {
        result = &mut handle => {
            result.context("Dispatcher task failed")??;
        }
        result = wait_for_signal() => {
            result?;
            let _ = shutdown_tx.send(()).await;
            handle.await.context("Dispatcher task failed")??;
        }
    }
    info!("Dispatcher shut down");
    Ok(())
}
