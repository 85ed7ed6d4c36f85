//! Serial Protocol Communication
//!
//! Implements the line protocol spoken by the robot controller: bracketed
//! state frames and free-text log lines in, single-letter commands out.

pub mod commands;
mod connection;
mod dispatcher;
mod error;
pub mod frame;
mod link;
mod queue;
mod receiver;
pub mod serial;
pub mod sink;
mod stats;
pub mod stream;

pub use commands::{Command, CommandByte};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use dispatcher::UpdateCallback;
pub use error::ProtocolError;
pub use frame::{parse_frame, FrameResult, RobotState};
pub use link::Link;
pub use queue::StateQueue;
pub use sink::{LogSink, MemorySink, TracingSink};
pub use stats::{LinkStats, LinkStatsSnapshot};
pub use stream::{ChannelOpener, CommunicationChannel, MemoryChannel, MemoryPeer, SerialOpener};

/// Baud rate used by the controller firmware
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Transport read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 200;

/// Sleep between loop iterations in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Wait after opening before streaming is enabled, in milliseconds.
/// Opening the port resets Arduino-style boards, which need time to boot.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Wait after sending the disable command before closing, in milliseconds
pub const DEFAULT_DISABLE_GRACE_MS: u64 = 500;

/// Undelivered states kept before the oldest is dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Longest line, in bytes, handed to the parser; longer input is split
/// at this limit (backing off to a character boundary)
pub const MAX_LINE_LENGTH: usize = 1024;
