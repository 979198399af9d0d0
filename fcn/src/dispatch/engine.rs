//! Dispatch decision engine
//!
//! Turns a stream of scan events into SESSION start/stop commands, at most one
//! start per ongoing observation.
//!
//! Per incoming event, for projects passing the project filter:
//!
//! | event                                  | pending entry       | result                    |
//! |----------------------------------------|---------------------|---------------------------|
//! | completion (`source == FINISH`)        | present             | stop, entry removed       |
//! | completion                             | absent              | nothing                   |
//! | intent does not match                  | any                 | nothing                   |
//! | intent matches                         | same source         | nothing (duplicate)       |
//! | intent matches                         | absent or other     | start, entry recorded     |

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::handoff::Command;

/// Default length requested for a coordinated observation
pub const DEFAULT_MAX_SESSION_SECS: u32 = 10800;

/// Source name marking the end of an observing session
pub const FINISH_SOURCE: &str = "FINISH";

/// One scan description from the observatory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub project_id: String,
    pub source: String,
    pub scan_intent: String,
    /// Degrees
    pub ra: f64,
    /// Degrees
    pub dec: f64,
    /// UNIX seconds
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<u32>,
}

impl ScanEvent {
    pub fn is_finish(&self) -> bool {
        self.source.eq_ignore_ascii_case(FINISH_SOURCE)
    }
}

/// Substring filters; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchFilter {
    pub project: String,
    pub intent: String,
}

impl DispatchFilter {
    pub fn new(project: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            intent: intent.into(),
        }
    }

    pub fn matches_project(&self, project_id: &str) -> bool {
        project_id.contains(&self.project)
    }

    pub fn matches_intent(&self, scan_intent: &str) -> bool {
        scan_intent.contains(&self.intent)
    }
}

/// An observation already announced to partners
#[derive(Debug, Clone, PartialEq)]
pub struct PendingObservation {
    pub source: String,
    pub serial: i32,
    pub ra: f64,
    pub dec: f64,
}

#[derive(Debug)]
pub struct DispatchEngine {
    filter: DispatchFilter,
    max_session_secs: u32,
    pending: HashMap<String, PendingObservation>,
}

impl DispatchEngine {
    pub fn new(filter: DispatchFilter) -> Self {
        Self::with_max_session(filter, DEFAULT_MAX_SESSION_SECS)
    }

    pub fn with_max_session(filter: DispatchFilter, max_session_secs: u32) -> Self {
        Self {
            filter,
            max_session_secs,
            pending: HashMap::new(),
        }
    }

    pub fn filter(&self) -> &DispatchFilter {
        &self.filter
    }

    pub fn pending(&self, project_id: &str) -> Option<&PendingObservation> {
        self.pending.get(project_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Decide what, if anything, to send for `event`
    ///
    /// `now` seeds the serial of any new observation.
    pub fn process(&mut self, event: &ScanEvent, now: DateTime<Utc>) -> Option<Command> {
        debug!(?event, "DispatchEngine::process: called");
        if !self.filter.matches_project(&event.project_id) {
            info!(
                scan = ?event.scan,
                intent = %event.scan_intent,
                project = %event.project_id,
                "Skipping scan"
            );
            return None;
        }

        if event.is_finish() {
            return self.finish(event);
        }

        if !self.filter.matches_intent(&event.scan_intent) {
            debug!(intent = %event.scan_intent, wanted = %self.filter.intent, "Intent does not match");
            return None;
        }

        if let Some(pending) = self.pending.get(&event.project_id) {
            if pending.source == event.source {
                debug!(
                    project = %event.project_id,
                    source = %event.source,
                    serial = pending.serial,
                    "Already dispatched for this target"
                );
                return None;
            }
            info!(
                project = %event.project_id,
                previous = %pending.source,
                source = %event.source,
                "Target changed, replacing pending observation"
            );
        }

        let serial = event_serial_from(now);
        info!(
            scan = ?event.scan,
            project = %event.project_id,
            source = %event.source,
            serial,
            "Scan contains desired intent, starting observation at ({:.4}, {:.4})",
            event.ra,
            event.dec
        );
        self.pending.insert(
            event.project_id.clone(),
            PendingObservation {
                source: event.source.clone(),
                serial,
                ra: event.ra,
                dec: event.dec,
            },
        );
        Some(Command::session(
            serial,
            event.start_time,
            event.ra,
            event.dec,
            self.max_session_secs as f64,
        ))
    }

    fn finish(&mut self, event: &ScanEvent) -> Option<Command> {
        match self.pending.remove(&event.project_id) {
            Some(pending) => {
                info!(
                    project = %event.project_id,
                    source = %pending.source,
                    serial = pending.serial,
                    "Session finished, stopping observation"
                );
                Some(Command::session(
                    pending.serial,
                    event.start_time,
                    pending.ra,
                    pending.dec,
                    0.0,
                ))
            }
            None => {
                info!(project = %event.project_id, "Finish for project with nothing pending");
                None
            }
        }
    }
}

/// Event serial for a new observation, `MMDDhhmmss` of `now` in UTC
pub fn event_serial_from(now: DateTime<Utc>) -> i32 {
    (now.month() as i32) * 100_000_000
        + (now.day() as i32) * 1_000_000
        + (now.hour() as i32) * 10_000
        + (now.minute() as i32) * 100
        + now.second() as i32
}
