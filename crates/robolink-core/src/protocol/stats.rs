//! Traffic counters shared by the link and both loops

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkStats {
    lines_received: AtomicU64,
    states_queued: AtomicU64,
    states_dispatched: AtomicU64,
    dropped_states: AtomicU64,
    log_lines: AtomicU64,
    malformed_frames: AtomicU64,
    read_errors: AtomicU64,
    commands_sent: AtomicU64,
    write_errors: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatsSnapshot {
    pub lines_received: u64,
    pub states_queued: u64,
    pub states_dispatched: u64,
    pub dropped_states: u64,
    pub log_lines: u64,
    pub malformed_frames: u64,
    pub read_errors: u64,
    pub commands_sent: u64,
    pub write_errors: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn line_received(&self) {
        bump(&self.lines_received);
    }

    pub(crate) fn state_queued(&self) {
        bump(&self.states_queued);
    }

    pub(crate) fn state_dispatched(&self) {
        bump(&self.states_dispatched);
    }

    pub(crate) fn state_dropped(&self) {
        bump(&self.dropped_states);
    }

    pub(crate) fn log_line(&self) {
        bump(&self.log_lines);
    }

    pub(crate) fn malformed_frame(&self) {
        bump(&self.malformed_frames);
    }

    pub(crate) fn read_error(&self) {
        bump(&self.read_errors);
    }

    pub(crate) fn command_sent(&self) {
        bump(&self.commands_sent);
    }

    pub(crate) fn write_error(&self) {
        bump(&self.write_errors);
    }

    pub fn snapshot(&self) -> LinkStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LinkStatsSnapshot {
            lines_received: get(&self.lines_received),
            states_queued: get(&self.states_queued),
            states_dispatched: get(&self.states_dispatched),
            dropped_states: get(&self.dropped_states),
            log_lines: get(&self.log_lines),
            malformed_frames: get(&self.malformed_frames),
            read_errors: get(&self.read_errors),
            commands_sent: get(&self.commands_sent),
            write_errors: get(&self.write_errors),
        }
    }
}
