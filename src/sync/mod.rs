//! # Sync Module
//!
//! Per-cycle decisions between direct delivery, offline buffering and backlog
//! draining.
//!
//! This module handles:
//! - The device [`Mode`] derived from connectivity and backlog depth
//! - The [`SyncEngine`] state machine run once per control cycle
//! - Publishing [`EngineStatus`] to presentation collaborators

pub mod engine;

pub use engine::{CycleReport, SyncEngine};

use std::fmt;

/// Connectivity/backlog status shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Link up, no backlog
    Live,
    /// Link down or sends failing; new readings go to the queue
    Queuing,
    /// Link up and the backlog is being flushed
    Draining,
}

impl Mode {
    /// Mode outside of a drain call
    ///
    /// Offline is always `Queuing`, even with an empty backlog, since the
    /// next reading will be queued.
    pub fn derive(connected: bool, backlog: usize) -> Self {
        if connected && backlog == 0 {
            Mode::Live
        } else {
            Mode::Queuing
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mode::Live => "LIVE",
            Mode::Queuing => "QUEUING",
            Mode::Draining => "DRAINING",
        };
        f.write_str(label)
    }
}

/// Snapshot published after every state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    pub mode: Mode,
    pub backlog: usize,
    pub connected: bool,
    /// False once the queue store failed to mount; readings produced while
    /// offline are then lost
    pub buffering_available: bool,
    pub provisioning: bool,
}
