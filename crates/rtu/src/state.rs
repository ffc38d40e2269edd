//! In-memory RTU state for the live dashboard: the latest snapshot (sensor
//! vector + derived values + simulation summary) and a capped event ring
//! buffer of operator commands, injections, and status changes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::plant::ScanResult;
use crate::process::{SensorVector, SimSummary};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<RtuState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Immutable value published once per scan and handed to every reader.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub sensors: SensorVector,
    pub derived: ScanResult,
    pub sim: SimSummary,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// SCADA / dashboard coil command.
    Command,
    /// Scenario injection (rain, faults, glitch, dosing).
    Injection,
    /// Plant status transition.
    Status,
    System,
}

pub struct RtuState {
    pub started_at: Instant,
    snapshot: Snapshot,
    events: VecDeque<SystemEvent>,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl RtuState {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            started_at: Instant::now(),
            snapshot: initial,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Publish the result of one scan cycle.
    pub fn record_scan(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
    }

    pub fn record_command(&mut self, detail: String) {
        self.push_event(EventKind::Command, detail);
    }

    pub fn record_injection(&mut self, detail: String) {
        self.push_event(EventKind::Injection, detail);
    }

    pub fn record_status(&mut self, detail: String) {
        self.push_event(EventKind::Status, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    /// Build the JSON-serialisable status view, newest events first.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            snapshot: self.snapshot.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
