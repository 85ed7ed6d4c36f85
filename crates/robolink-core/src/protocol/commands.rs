//! Protocol commands
//!
//! Defines the single-letter commands understood by the robot controller.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ProtocolError;

/// Commands known to the controller firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Start driving rounds ('S'), only accepted on the start field
    Start,

    /// Pause or resume rounds ('P')
    Pause,

    /// Reset the controller ('R')
    Rest,

    /// Return to the start field ('C')
    Home,

    /// Freeze all motion ('X')
    Freeze,

    /// Toggle manual driving ('M')
    ManualToggle,

    /// Manual drive forward ('W')
    Forward,

    /// Manual drive left ('A')
    Left,

    /// Manual drive right ('D')
    Right,

    /// Manual drive backward ('B')
    Backward,

    /// Begin publishing state frames ('Y')
    EnableStreaming,

    /// Stop publishing state frames ('Q')
    DisableStreaming,

    /// Publish a single state frame ('N')
    RequestState,
}

impl Command {
    /// All named commands
    pub const ALL: [Command; 13] = [
        Command::Start,
        Command::Pause,
        Command::Rest,
        Command::Home,
        Command::Freeze,
        Command::ManualToggle,
        Command::Forward,
        Command::Left,
        Command::Right,
        Command::Backward,
        Command::EnableStreaming,
        Command::DisableStreaming,
        Command::RequestState,
    ];

    /// Get the command byte sent on the wire
    pub fn byte(&self) -> u8 {
        match self {
            Command::Start => b'S',
            Command::Pause => b'P',
            Command::Rest => b'R',
            Command::Home => b'C',
            Command::Freeze => b'X',
            Command::ManualToggle => b'M',
            Command::Forward => b'W',
            Command::Left => b'A',
            Command::Right => b'D',
            Command::Backward => b'B',
            Command::EnableStreaming => b'Y',
            Command::DisableStreaming => b'Q',
            Command::RequestState => b'N',
        }
    }

    /// Look up the named command for a wire byte
    pub fn from_byte(byte: u8) -> Option<Command> {
        Self::ALL.iter().copied().find(|c| c.byte() == byte)
    }

    /// Whether the firmware only honours this command in manual mode
    pub fn requires_manual_mode(&self) -> bool {
        matches!(
            self,
            Command::Forward | Command::Left | Command::Right | Command::Backward
        )
    }
}

/// A validated outbound command: exactly one uppercase ASCII letter.
///
/// Letters without a named [`Command`] are still accepted; the firmware
/// silently ignores the ones it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandByte(u8);

impl CommandByte {
    pub fn new(byte: u8) -> Result<Self, ProtocolError> {
        if byte.is_ascii_uppercase() {
            Ok(Self(byte))
        } else {
            Err(ProtocolError::InvalidCommand((byte as char).to_string()))
        }
    }

    /// Validate caller-supplied text
    pub fn parse(data: &str) -> Result<Self, ProtocolError> {
        let mut chars = data.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_uppercase() => Ok(Self(c as u8)),
            _ => Err(ProtocolError::InvalidCommand(data.to_string())),
        }
    }

    pub fn byte(&self) -> u8 {
        self.0
    }

    /// Bytes written to the transport, including the line terminator
    pub fn to_wire(&self) -> [u8; 3] {
        [self.0, b'\r', b'\n']
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_byte(self.0)
    }
}

impl From<Command> for CommandByte {
    fn from(cmd: Command) -> Self {
        Self(cmd.byte())
    }
}

impl fmt::Display for CommandByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as char)
    }
}
