//! FCN configuration types and loading

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dispatch::DEFAULT_MAX_SESSION_SECS;
use crate::receiver::ReceiverConfig;
use crate::sender::NotifierConfig;
use crate::server::ServerConfig;

/// Project-local config file name
pub const LOCAL_CONFIG: &str = ".fcn.yml";

/// Main FCN configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Log to this file instead of stderr
    #[serde(rename = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Notification server
    pub server: ServerSection,

    /// Partner-side receiver
    pub client: ClientSection,

    /// Scan-driven dispatcher
    pub dispatch: DispatchSection,
}

impl Config {
    /// Find the config file to use
    ///
    /// An explicit path always wins; otherwise the first of `./.fcn.yml` and
    /// `<config_dir>/fcn/fcn.yml` that loads.
    pub fn locate(config_path: Option<&PathBuf>) -> Option<PathBuf> {
        if let Some(path) = config_path {
            return Some(path.clone());
        }

        Self::implicit_paths()
            .into_iter()
            .find(|path| path.exists() && Self::load_from_file(path).is_ok())
    }

    /// Load configuration with fallback chain
    ///
    /// An explicit path must load; an implicit file that fails to load is
    /// reported and skipped.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        Ok(Self::load_first(&Self::implicit_paths()))
    }

    fn implicit_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("fcn").join("fcn.yml"));
        }
        paths
    }

    fn load_first(paths: &[PathBuf]) -> Self {
        for path in paths.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => eprintln!("Warning: Failed to load config from {}: {:#}", path.display(), e),
            }
        }
        Self::default()
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

/// Notification server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Destinations, one `<ip> <port>` per line
    #[serde(rename = "hosts-file")]
    pub hosts_file: PathBuf,

    /// Pending-command hand-off file
    #[serde(rename = "command-file")]
    pub command_file: PathBuf,

    /// Packet serial number store
    #[serde(rename = "serial-file")]
    pub serial_file: PathBuf,

    #[serde(rename = "heartbeat-interval-secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,

    #[serde(rename = "ack-timeout-ms")]
    pub ack_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            hosts_file: PathBuf::from("hosts.cfg"),
            command_file: PathBuf::from("incoming.cmd"),
            serial_file: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("fcn")
                .join(".sn"),
            heartbeat_interval_secs: 60,
            poll_interval_ms: 100,
            connect_timeout_ms: 5000,
            ack_timeout_ms: 5000,
        }
    }
}

impl ServerSection {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
        }
    }
}

/// Receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Append-only log of raw received packets
    #[serde(rename = "receive-log")]
    pub receive_log: PathBuf,

    #[serde(rename = "recv-timeout-secs")]
    pub recv_timeout_secs: u64,

    /// Silence tolerated before a peer is dropped
    #[serde(rename = "idle-limit-secs")]
    pub idle_limit_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            receive_log: PathBuf::from("log"),
            recv_timeout_secs: 1800,
            idle_limit_secs: 3600,
        }
    }
}

impl ClientSection {
    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig {
            recv_timeout: Duration::from_secs(self.recv_timeout_secs),
            idle_limit: Duration::from_secs(self.idle_limit_secs),
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Project identifier substring; empty matches all
    pub project: String,

    /// Scan intent substring; empty matches all
    pub intent: String,

    #[serde(rename = "multicast-group")]
    pub multicast_group: Ipv4Addr,

    #[serde(rename = "multicast-port")]
    pub multicast_port: u16,

    #[serde(rename = "command-file")]
    pub command_file: PathBuf,

    /// Duration requested for a new observation
    #[serde(rename = "max-session-secs")]
    pub max_session_secs: u32,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            project: String::new(),
            intent: String::new(),
            multicast_group: Ipv4Addr::new(239, 192, 3, 2),
            multicast_port: 53001,
            command_file: PathBuf::from("incoming.cmd"),
            max_session_secs: DEFAULT_MAX_SESSION_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.log_level, None);
        assert_eq!(config.server.hosts_file, PathBuf::from("hosts.cfg"));
        assert_eq!(config.server.heartbeat_interval_secs, 60);
        assert_eq!(config.client.recv_timeout_secs, 1800);
        assert_eq!(config.client.idle_limit_secs, 3600);
        assert_eq!(config.dispatch.multicast_group, Ipv4Addr::new(239, 192, 3, 2));
        assert_eq!(config.dispatch.multicast_port, 53001);
        assert_eq!(config.dispatch.max_session_secs, 10800);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug
log-file: /var/log/fcn.log

server:
  hosts-file: /etc/fcn/hosts.cfg
  command-file: /tmp/incoming.cmd
  serial-file: /var/lib/fcn/.sn
  heartbeat-interval-secs: 30
  poll-interval-ms: 250
  connect-timeout-ms: 2000
  ack-timeout-ms: 3000

client:
  receive-log: /var/log/fcn/packets
  recv-timeout-secs: 600
  idle-limit-secs: 1200

dispatch:
  project: 15B-378
  intent: TARGET
  multicast-group: 239.192.3.9
  multicast-port: 53009
  max-session-secs: 3600
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.server.hosts_file, PathBuf::from("/etc/fcn/hosts.cfg"));
        assert_eq!(config.server.server_config().poll_interval, Duration::from_millis(250));
        assert_eq!(config.server.notifier_config().ack_timeout, Duration::from_secs(3));
        assert_eq!(config.client.receiver_config().idle_limit, Duration::from_secs(1200));
        assert_eq!(config.dispatch.intent, "TARGET");
        assert_eq!(config.dispatch.multicast_group, Ipv4Addr::new(239, 192, 3, 9));
        assert_eq!(config.dispatch.max_session_secs, 3600);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
client:
  idle-limit-secs: 10
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.client.idle_limit_secs, 10);
        assert_eq!(config.client.recv_timeout_secs, 1800);
        assert_eq!(config.server.poll_interval_ms, 100);
        assert_eq!(config.dispatch.command_file, PathBuf::from("incoming.cmd"));
    }

    #[test]
    fn test_unloadable_config_falls_through_to_next() {
        let temp = TempDir::new().unwrap();
        let broken = temp.path().join("broken.yml");
        let good = temp.path().join("fcn.yml");
        std::fs::write(&broken, "server: [not, a, map").unwrap();
        std::fs::write(&good, "log-level: debug\n").unwrap();

        let config = Config::load_first(&[broken.clone(), temp.path().join("missing.yml"), good]);
        assert_eq!(config.log_level.as_deref(), Some("debug"));

        let config = Config::load_first(&[broken]);
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn test_explicit_path_must_load() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.yml");
        assert!(Config::load(Some(&missing)).is_err());

        let path = temp.path().join("fcn.yml");
        fs::write(&path, "server:\n  hosts-file: partners.cfg\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.hosts_file, PathBuf::from("partners.cfg"));
        assert_eq!(Config::locate(Some(&path)), Some(path));
    }
}
