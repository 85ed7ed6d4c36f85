//! Connection management
//!
//! Handles the connection lifecycle: at most one live link, its receive and
//! dispatch loops, and the commands sent through it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::Level;

use super::dispatcher::{Dispatcher, UpdateCallback};
use super::link::Link;
use super::queue::StateQueue;
use super::receiver::Receiver;
use super::sink::{LogSink, TracingSink};
use super::stats::{LinkStats, LinkStatsSnapshot};
use super::stream::{ChannelOpener, SerialOpener};
use super::{
    Command, CommandByte, ProtocolError, RobotState, DEFAULT_BAUD_RATE, DEFAULT_DISABLE_GRACE_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_SETTLE_DELAY_MS,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link
    Closed,
    /// Port being opened
    Opening,
    /// Link open, loops running
    Open,
    /// Loops stopping, link being released
    Closing,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Transport read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Sleep between loop iterations in milliseconds
    pub poll_interval_ms: u64,
    /// Delay after opening before streaming is enabled
    pub settle_delay_ms: u64,
    /// Delay after the disable command before the port is closed
    pub disable_grace_ms: u64,
    /// Undelivered states kept before the oldest is dropped
    pub queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            disable_grace_ms: DEFAULT_DISABLE_GRACE_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn disable_grace(&self) -> Duration {
        Duration::from_millis(self.disable_grace_ms)
    }

    /// Reject values the link cannot work with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::InvalidConfig(
                "baud_rate must be non-zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ProtocolError::InvalidConfig(
                "queue_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from a JSON file; absent fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), ProtocolError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }
}

/// The one live link and the threads serving it
struct ActiveConnection {
    link: Arc<Link>,
    stop: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ActiveConnection {
    /// Raise the stop flag and wait for both loops to exit
    fn stop_loops(&mut self, sink: &dyn LogSink) {
        self.stop.store(true, Ordering::Release);
        for (name, handle) in [
            ("receive", self.receiver.take()),
            ("dispatch", self.dispatcher.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    sink.log(Level::ERROR, &format!("The {} loop panicked", name));
                }
            }
        }
    }
}

/// Owns the connection to the robot controller.
///
/// All consumer-facing messages go to the configured [`LogSink`]; none of the
/// public operations panic or return errors across this boundary except the
/// explicit [`connect`](Self::connect)/[`try_send_command`](Self::try_send_command).
pub struct ConnectionManager {
    config: ConnectionConfig,
    opener: Box<dyn ChannelOpener>,
    sink: Arc<dyn LogSink>,
    state: ConnectionState,
    active: Option<ActiveConnection>,
    stats: Arc<LinkStats>,
}

impl ConnectionManager {
    /// Manager for real serial ports, logging through `tracing`
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_opener(config, SerialOpener)
    }

    pub fn with_opener(config: ConnectionConfig, opener: impl ChannelOpener + 'static) -> Self {
        Self {
            config,
            opener: Box::new(opener),
            sink: Arc::new(TracingSink),
            state: ConnectionState::Closed,
            active: None,
            stats: Arc::new(LinkStats::new()),
        }
    }

    /// Replace the log sink
    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Port of the live connection
    pub fn port_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.link.port_name())
    }

    /// Counters for the current (or most recent) connection
    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| a.link.is_open())
            .unwrap_or(false)
    }

    /// Toggle: connect to `port` when closed, disconnect when open.
    ///
    /// Returns whether a connection is open afterwards. Failures are
    /// reported to the log sink, never raised.
    pub fn open<F>(&mut self, port: &str, on_update: F) -> bool
    where
        F: FnMut(RobotState) + Send + 'static,
    {
        if self.active.is_some() {
            self.close(true);
            return false;
        }
        self.connect(port, on_update).is_ok()
    }

    /// Connect to `port` and start delivering states to `on_update`
    pub fn connect<F>(&mut self, port: &str, on_update: F) -> Result<(), ProtocolError>
    where
        F: FnMut(RobotState) + Send + 'static,
    {
        if self.active.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }

        self.state = ConnectionState::Opening;
        match self.start(port, Box::new(on_update)) {
            Ok(active) => {
                self.active = Some(active);
                self.state = ConnectionState::Open;
                self.sink.log(Level::INFO, &format!("Connected to {}", port));
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                self.sink
                    .log(Level::ERROR, &format!("Connection to {} failed: {}", port, e));
                Err(e)
            }
        }
    }

    fn start(
        &mut self,
        port: &str,
        on_update: UpdateCallback,
    ) -> Result<ActiveConnection, ProtocolError> {
        self.config.validate()?;

        self.stats = Arc::new(LinkStats::new());
        let link = Arc::new(Link::open(
            port,
            &self.config,
            self.opener.as_ref(),
            Arc::clone(&self.stats),
        )?);
        let queue = Arc::new(StateQueue::new(self.config.queue_capacity));
        let stop = Arc::new(AtomicBool::new(false));

        let mut active = ActiveConnection {
            link: Arc::clone(&link),
            stop: Arc::clone(&stop),
            receiver: None,
            dispatcher: None,
        };

        let receiver = Receiver::new(
            Arc::clone(&link),
            Arc::clone(&queue),
            Arc::clone(&self.sink),
            Arc::clone(&self.stats),
            Arc::clone(&stop),
            self.config.poll_interval(),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&link),
            queue,
            Arc::clone(&self.sink),
            Arc::clone(&self.stats),
            stop,
            on_update,
            self.config.poll_interval(),
            self.config.settle_delay(),
        );

        let spawned = receiver.spawn().and_then(|rx| {
            active.receiver = Some(rx);
            dispatcher.spawn()
        });
        match spawned {
            Ok(handle) => {
                active.dispatcher = Some(handle);
                Ok(active)
            }
            Err(e) => {
                active.stop_loops(self.sink.as_ref());
                link.close();
                Err(e.into())
            }
        }
    }

    /// Stop both loops and release the port.
    ///
    /// Blocks until the loops have exited, so no update callback runs after
    /// this returns. With `manual`, the controller is first told to stop
    /// streaming (best effort) and given a short grace period.
    pub fn close(&mut self, manual: bool) {
        let mut active = match self.active.take() {
            Some(active) => active,
            None => return,
        };
        self.state = ConnectionState::Closing;

        active.stop_loops(self.sink.as_ref());

        if manual {
            if let Err(e) = active
                .link
                .write_command(CommandByte::from(Command::DisableStreaming))
            {
                tracing::debug!("disable command not delivered: {}", e);
            }
            std::thread::sleep(self.config.disable_grace());
        }

        active.link.close();
        self.state = ConnectionState::Closed;
        self.sink.log(
            Level::INFO,
            &format!("Disconnected from {}", active.link.port_name()),
        );
    }

    /// Explicit, non-toggling disconnect
    pub fn disconnect(&mut self) {
        self.close(true);
    }

    /// Validate and send caller-supplied command text
    pub fn try_send_command(&self, data: &str) -> Result<(), ProtocolError> {
        let active = self
            .active
            .as_ref()
            .filter(|a| a.link.is_open())
            .ok_or(ProtocolError::NotConnected)?;
        let cmd = CommandByte::parse(data)?;
        active.link.write_command(cmd)
    }

    /// Send one uppercase letter; rejections are logged, not raised
    pub fn send_command(&self, data: &str) {
        match self.try_send_command(data) {
            Ok(()) => {}
            Err(e @ ProtocolError::NotConnected) | Err(e @ ProtocolError::InvalidCommand(_)) => {
                self.sink.log(Level::WARN, &format!("Not sent: {}", e))
            }
            Err(e) => self.sink.log(Level::ERROR, &format!("Send failed: {}", e)),
        }
    }

    /// Send a named command
    pub fn send(&self, cmd: Command) {
        self.send_command(&CommandByte::from(cmd).to_string());
    }

    /// Ask the controller for one state frame
    pub fn request_state(&self) {
        if !self.is_connected() {
            tracing::debug!("state request ignored: not connected");
            return;
        }
        self.send(Command::RequestState);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close(false);
    }
}
