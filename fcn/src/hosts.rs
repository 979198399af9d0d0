//! Destination hosts list
//!
//! One destination per line as `<ip> <port>`. Comment lines (`#`) and lines too
//! short to hold an address are skipped; malformed lines are logged and skipped.

use std::fmt;
use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

/// A partner endpoint that receives notifications
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address string suitable for `TcpStream::connect`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.host, self.port)
    }
}

/// Load the hosts list; a missing or unreadable file is an error
pub fn load_hosts(path: impl AsRef<Path>) -> Result<Vec<Destination>> {
    let path = path.as_ref();
    debug!(?path, "load_hosts: called");
    let contents =
        fs::read_to_string(path).with_context(|| format!("Cannot read hosts file '{}'", path.display()))?;
    let hosts = parse_hosts(&contents);
    info!(count = hosts.len(), path = %path.display(), "Loaded hosts");
    Ok(hosts)
}

pub fn parse_hosts(contents: &str) -> Vec<Destination> {
    contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Destination> {
    if line.starts_with('#') || line.trim().len() < 3 {
        return None;
    }

    let mut fields = line.split_whitespace();
    let parsed = match (fields.next(), fields.next(), fields.next()) {
        (Some(host), Some(port), None) => port.parse::<u16>().map(|port| Destination::new(host, port)).ok(),
        _ => None,
    };

    if parsed.is_none() {
        warn!(line = line.trim_end(), "Cannot parse hosts line, skipping");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_hosts() {
        let contents = "\
# partner observatories
10.1.1.50 5050
lwa.example.org    6000

x
";
        let hosts = parse_hosts(contents);
        assert_eq!(
            hosts,
            vec![Destination::new("10.1.1.50", 5050), Destination::new("lwa.example.org", 6000)]
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let contents = "10.0.0.1 notaport\n10.0.0.2\n10.0.0.3 70000\n10.0.0.4 80 extra\n10.0.0.5 81\n";
        let hosts = parse_hosts(contents);
        assert_eq!(hosts, vec![Destination::new("10.0.0.5", 81)]);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(load_hosts(temp.path().join("hosts.cfg")).is_err());
    }

    #[test]
    fn test_load_hosts_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hosts.cfg");
        fs::write(&path, "127.0.0.1 5001\n127.0.0.1 5002\n").unwrap();
        let hosts = load_hosts(&path).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[1].addr(), "127.0.0.1:5002");
    }

    #[test]
    fn test_display() {
        assert_eq!(Destination::new("1.2.3.4", 99).to_string(), "1.2.3.4 @ 99");
    }
}
