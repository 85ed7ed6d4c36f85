//! The physical link to the controller
//!
//! A [`Link`] owns two handles onto the same channel: the read side is used
//! only by the receive loop, the write side sits behind its own mutex so
//! commands from the caller and from the dispatch loop never interleave.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::frame::strip_terminator;
use super::stats::LinkStats;
use super::stream::{ChannelOpener, CommunicationChannel};
use super::{CommandByte, ConnectionConfig, ProtocolError, MAX_LINE_LENGTH};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn transport_fault(e: std::io::Error) -> ProtocolError {
    ProtocolError::TransportFault(e.to_string())
}

/// Splits the incoming byte stream into lines
struct LineReader {
    channel: Box<dyn CommunicationChannel>,
    buffer: Vec<u8>,
}

impl LineReader {
    fn new(channel: Box<dyn CommunicationChannel>) -> Self {
        Self {
            channel,
            buffer: Vec::with_capacity(256),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) if pos <= MAX_LINE_LENGTH => pos + 1,
            _ if self.buffer.len() >= MAX_LINE_LENGTH => {
                tracing::debug!(
                    bytes = self.buffer.len(),
                    "splitting overlong line at length limit"
                );
                self.split_point()
            }
            _ => return None,
        };

        let raw: Vec<u8> = self.buffer.drain(..end).collect();
        let text = String::from_utf8_lossy(&raw);
        Some(strip_terminator(&text).to_string())
    }

    /// Cut at the limit, backing off so a UTF-8 sequence is not split
    fn split_point(&self) -> usize {
        match std::str::from_utf8(&self.buffer[..MAX_LINE_LENGTH]) {
            Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => e.valid_up_to(),
            _ => MAX_LINE_LENGTH,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>, ProtocolError> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let available = self.channel.bytes_to_read().map_err(transport_fault)?;
        if available == 0 {
            return Ok(None);
        }

        let mut chunk = [0u8; 512];
        let to_read = (available as usize).min(chunk.len());
        match self.channel.read(&mut chunk[..to_read]) {
            Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(transport_fault(e)),
        }

        Ok(self.take_line())
    }
}

pub struct Link {
    port_name: String,
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<Box<dyn CommunicationChannel>>>,
    open: AtomicBool,
    stats: Arc<LinkStats>,
}

impl Link {
    /// Open `port` through `opener` and prepare independent read/write handles
    pub fn open(
        port: &str,
        config: &ConnectionConfig,
        opener: &dyn ChannelOpener,
        stats: Arc<LinkStats>,
    ) -> Result<Self, ProtocolError> {
        let mut channel = opener.open(port, config)?;
        channel
            .set_timeout(Duration::from_millis(config.read_timeout_ms))
            .map_err(transport_fault)?;
        let writer = channel.try_clone().map_err(transport_fault)?;

        tracing::debug!(port, "link open");

        Ok(Self {
            port_name: port.to_string(),
            reader: Mutex::new(Some(LineReader::new(channel))),
            writer: Mutex::new(Some(writer)),
            open: AtomicBool::new(true),
            stats,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Return one complete line if the bytes for it have arrived.
    ///
    /// Only bytes already buffered by the driver are read, so this returns
    /// within the transport read timeout even when the device is silent.
    pub fn read_line(&self) -> Result<Option<String>, ProtocolError> {
        if !self.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        let mut guard = lock(&self.reader);
        let reader = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        let line = reader.read_line()?;
        if line.is_some() {
            self.stats.line_received();
        }
        Ok(line)
    }

    /// Write `cmd` followed by `\r\n`
    pub fn write_command(&self, cmd: CommandByte) -> Result<(), ProtocolError> {
        if !self.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        let result = writer
            .write_all(&cmd.to_wire())
            .and_then(|_| writer.flush())
            .map_err(transport_fault);

        match &result {
            Ok(()) => {
                self.stats.command_sent();
                tracing::debug!(port = %self.port_name, command = %cmd, "sent command");
            }
            Err(e) => {
                self.stats.write_error();
                tracing::debug!(port = %self.port_name, command = %cmd, "write failed: {}", e);
            }
        }
        result
    }

    /// Release both handles; later reads and writes report `NotConnected`
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        lock(&self.writer).take();
        lock(&self.reader).take();
        tracing::debug!(port = %self.port_name, "link closed");
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::stream::MemoryChannel;
    use crate::protocol::Command;

    fn open_memory() -> (Link, crate::protocol::stream::MemoryPeer, Arc<LinkStats>) {
        let chan = MemoryChannel::new();
        let peer = chan.peer();
        let stats = Arc::new(LinkStats::new());
        let link = Link::open(
            "mem0",
            &ConnectionConfig::default(),
            &chan,
            Arc::clone(&stats),
        )
        .unwrap();
        (link, peer, stats)
    }

    #[test]
    fn test_reads_whole_lines_only() {
        let (link, peer, stats) = open_memory();
        assert_eq!(link.read_line().unwrap(), None);

        peer.inject(b"[1,2");
        assert_eq!(link.read_line().unwrap(), None);
        peer.inject(b",3]\r\nhello\n");
        assert_eq!(link.read_line().unwrap().as_deref(), Some("[1,2,3]"));
        assert_eq!(link.read_line().unwrap().as_deref(), Some("hello"));
        assert_eq!(link.read_line().unwrap(), None);
        assert_eq!(stats.snapshot().lines_received, 2);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let (link, peer, _) = open_memory();
        peer.inject(b"ok\xff\n");
        assert_eq!(link.read_line().unwrap().as_deref(), Some("ok\u{fffd}"));
    }

    #[test]
    fn test_overlong_line_is_flushed() {
        let (link, peer, _) = open_memory();
        peer.inject(&vec![b'x'; MAX_LINE_LENGTH + 10]);
        let mut lines = Vec::new();
        for _ in 0..8 {
            if let Some(line) = link.read_line().unwrap() {
                lines.push(line);
            }
        }
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_LENGTH);
    }

    #[test]
    fn test_overlong_line_never_exceeds_limit() {
        let (link, peer, _) = open_memory();
        peer.inject(&vec![b'a'; 1000]);
        assert_eq!(link.read_line().unwrap(), None);
        peer.inject(&vec![b'b'; 600]);
        peer.inject(b"\n");

        let mut lines = Vec::new();
        for _ in 0..8 {
            if let Some(line) = link.read_line().unwrap() {
                lines.push(line);
            }
        }
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_LENGTH);
        assert_eq!(lines[1].len(), 1600 - MAX_LINE_LENGTH);
        assert!(lines[1].chars().all(|c| c == 'b'));
    }

    #[test]
    fn test_overlong_line_split_keeps_characters_whole() {
        let (link, peer, _) = open_memory();
        let mut payload = vec![b'x'; MAX_LINE_LENGTH - 1];
        payload.extend_from_slice("é tail\n".as_bytes());
        peer.inject(&payload);

        let mut lines = Vec::new();
        for _ in 0..8 {
            if let Some(line) = link.read_line().unwrap() {
                lines.push(line);
            }
        }
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_LENGTH - 1);
        assert!(!lines[0].contains('\u{fffd}'));
        assert_eq!(lines[1], "é tail");
    }

    #[test]
    fn test_write_appends_terminator() {
        let (link, peer, stats) = open_memory();
        link.write_command(CommandByte::from(Command::Start)).unwrap();
        link.write_command(CommandByte::parse("N").unwrap()).unwrap();
        assert_eq!(peer.written(), b"S\r\nN\r\n".to_vec());
        assert_eq!(stats.snapshot().commands_sent, 2);
    }

    #[test]
    fn test_write_failure_is_transport_fault() {
        let (link, peer, stats) = open_memory();
        peer.set_fail_writes(true);
        let err = link.write_command(CommandByte::from(Command::Start)).unwrap_err();
        assert!(matches!(err, ProtocolError::TransportFault(_)));
        assert_eq!(stats.snapshot().write_errors, 1);
    }

    #[test]
    fn test_read_failure_is_transport_fault() {
        let (link, peer, _) = open_memory();
        peer.set_fail_reads(true);
        assert!(matches!(
            link.read_line(),
            Err(ProtocolError::TransportFault(_))
        ));
    }

    #[test]
    fn test_closed_link_rejects_io() {
        let (link, peer, _) = open_memory();
        link.close();
        assert!(!link.is_open());
        assert!(matches!(
            link.write_command(CommandByte::from(Command::Start)),
            Err(ProtocolError::NotConnected)
        ));
        assert!(matches!(link.read_line(), Err(ProtocolError::NotConnected)));
        assert!(peer.written().is_empty());
        // Closing twice is harmless
        link.close();
    }

    #[test]
    fn test_open_failure_propagates() {
        let opener = |port: &str,
                      _: &ConnectionConfig|
         -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
            Err(ProtocolError::PortUnavailable {
                port: port.to_string(),
                reason: "missing".to_string(),
            })
        };
        let result = Link::open(
            "COM9",
            &ConnectionConfig::default(),
            &opener,
            Arc::new(LinkStats::new()),
        );
        assert!(matches!(result, Err(ProtocolError::PortUnavailable { .. })));
    }
}
