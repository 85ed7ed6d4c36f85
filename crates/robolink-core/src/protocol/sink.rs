//! Log sink
//!
//! Device output and connection notices are meant for the operator, not just
//! for developer diagnostics, so they are handed to a [`LogSink`] the
//! consumer chooses (a console pane, a channel, a test recorder). The default
//! forwards to `tracing`.

use std::sync::{Arc, Mutex};
use tracing::Level;

/// Receives `(level, message)` pairs from the connection
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn log(&self, level: Level, message: &str) {
        self(level, message)
    }
}

/// Re-emits messages as `tracing` events under the `robolink::device` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "robolink::device", "{}", message),
            Level::WARN => tracing::warn!(target: "robolink::device", "{}", message),
            Level::INFO => tracing::info!(target: "robolink::device", "{}", message),
            Level::DEBUG => tracing::debug!(target: "robolink::device", "{}", message),
            _ => tracing::trace!(target: "robolink::device", "{}", message),
        }
    }
}

/// Keeps every message in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<(Level, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Messages logged at exactly `level`
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|(_, m)| m.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, message: &str) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push((level, message.to_string()));
    }
}
