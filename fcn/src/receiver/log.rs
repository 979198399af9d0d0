//! Append-only audit log of every accepted packet

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::debug;

/// Raw packet bytes, concatenated in arrival order
#[derive(Debug, Clone)]
pub struct ReceiveLog {
    path: PathBuf,
}

impl ReceiveLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one packet, creating the file and its directory on first use
    pub fn append(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create receive log directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open receive log")?;
        file.write_all(data).context("Failed to write receive log")?;
        file.sync_data().context("Failed to sync receive log")?;
        debug!(bytes = data.len(), path = ?self.path, "ReceiveLog::append");
        Ok(())
    }
}
