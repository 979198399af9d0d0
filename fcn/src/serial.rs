//! Packet serial number store
//!
//! A single decimal counter kept in a text file. The value survives restarts,
//! is rewritten synchronously on every increment, and is owned by one process at
//! a time through an exclusive lock on a sibling `.lock` file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use fs2::FileExt;
use tracing::{debug, warn};

/// Value handed out when no counter has been persisted yet
pub const FIRST_SERIAL: i32 = 1;

/// File-backed serial number generator
#[derive(Debug)]
pub struct SerialNumber {
    path: PathBuf,
    next: i32,
    /// Held for the lifetime of the store
    _lock: File,
}

impl SerialNumber {
    /// Open the store at `path`, creating parent directories as needed
    ///
    /// A missing or unreadable counter file starts the sequence at 1.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "SerialNumber::open: called");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create serial number directory")?;
        }

        let lock_path = lock_path_for(&path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context("Failed to open serial number lock file")?;
        FileExt::try_lock_exclusive(&lock)
            .with_context(|| format!("Serial number store {} is in use by another process", path.display()))?;

        let next = read_counter(&path).unwrap_or(FIRST_SERIAL);
        debug!(next, "SerialNumber::open: loaded counter");

        Ok(Self {
            path,
            next,
            _lock: lock,
        })
    }

    /// Hand out the next serial number and persist the one after it
    ///
    /// A failed write is logged; the in-memory sequence keeps advancing.
    pub fn get(&mut self) -> i32 {
        let out = self.next;
        self.next = self.next.checked_add(1).unwrap_or(FIRST_SERIAL);
        if let Err(e) = write_counter(&self.path, self.next) {
            warn!(path = ?self.path, error = %e, "Failed to persist serial number");
        }
        debug!(serial = out, "SerialNumber::get: returning");
        out
    }

    /// Restart the sequence at 1
    ///
    /// The in-memory value is left untouched if the new value cannot be written.
    pub fn reset(&mut self) -> Result<()> {
        debug!(path = ?self.path, "SerialNumber::reset: called");
        write_counter(&self.path, FIRST_SERIAL).context("Failed to reset serial number")?;
        self.next = FIRST_SERIAL;
        Ok(())
    }

    /// The value the next `get` will return
    pub fn peek(&self) -> i32 {
        self.next
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn read_counter(path: &Path) -> Option<i32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

fn write_counter(path: &Path, value: i32) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    write!(file, "{}", value)?;
    file.sync_data()
}
