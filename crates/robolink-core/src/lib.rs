//! # RoboLink Core Library
//!
//! Serial link handling for line-oriented robot controllers.

#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Framing of the controller's output into state frames and log lines
//! - A serial link with a locked write path and non-blocking line reads
//! - Background receive and dispatch loops with a bounded state queue
//! - A connection manager that keeps at most one link alive
//! - A simulated controller for running without hardware
//!
//! ## Example
//!
//! ```rust,no_run
//! use robolink_core::protocol::{Command, ConnectionConfig, ConnectionManager};
//!
//! let mut conn = ConnectionManager::new(ConnectionConfig::default());
//! if conn.open("/dev/ttyACM0", |state| println!("state: {}", state)) {
//!     conn.send(Command::Start);
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     conn.close(true);
//! }
//! ```

pub mod demo;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::demo::{DemoOpener, DemoRobot};
    pub use crate::protocol::{
        Command, CommandByte, ConnectionConfig, ConnectionManager, ConnectionState, FrameResult,
        LogSink, ProtocolError, RobotState,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
