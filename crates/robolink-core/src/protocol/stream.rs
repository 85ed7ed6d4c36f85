use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{serial, ConnectionConfig, ProtocolError};

/// Abstraction for the byte stream to the controller
pub trait CommunicationChannel: Read + Write + Send {
    /// Set timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Try to clone the channel
    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>>;

    /// Get number of bytes available to read
    fn bytes_to_read(&mut self) -> io::Result<u32>;
}

/// Produces a channel for a port name
pub trait ChannelOpener: Send + Sync {
    fn open(
        &self,
        port: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn CommunicationChannel>, ProtocolError>;
}

impl<F> ChannelOpener for F
where
    F: Fn(&str, &ConnectionConfig) -> Result<Box<dyn CommunicationChannel>, ProtocolError>
        + Send
        + Sync,
{
    fn open(
        &self,
        port: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        self(port, config)
    }
}

/// Opens real serial devices
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl ChannelOpener for SerialOpener {
    fn open(
        &self,
        port: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        let mut handle = serial::open_port(port, config)?;
        serial::configure_port(handle.as_mut(), port)?;
        serial::clear_buffers(handle.as_mut())?;
        Ok(Box::new(SerialChannel::new(handle)))
    }
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let port_clone = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialChannel::new(port_clone)))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }
}

#[derive(Default)]
struct MemoryState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-process channel.
///
/// Every clone shares the same buffers; a [`MemoryPeer`] obtained from
/// [`MemoryChannel::peer`] plays the device side: it injects bytes the
/// channel will read and inspects what was written.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    state: Arc<Mutex<MemoryState>>,
}

/// Device-side handle of a [`MemoryChannel`]
#[derive(Clone)]
pub struct MemoryPeer {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(&self) -> MemoryPeer {
        MemoryPeer {
            state: Arc::clone(&self.state),
        }
    }
}

impl MemoryPeer {
    /// Queue bytes for the channel to read
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.state).inbound.extend(bytes.iter().copied());
    }

    /// Queue one line, appending `\n`
    pub fn inject_line(&self, line: &str) {
        let mut state = lock(&self.state);
        state.inbound.extend(line.bytes());
        state.inbound.push_back(b'\n');
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).outbound.clone()
    }

    /// Take and clear everything written so far
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.state).outbound)
    }

    /// Make reads fail until cleared
    pub fn set_fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    /// Make writes fail until cleared
    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }
}

impl Read for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "read failure"));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failure"));
        }
        state.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Every open hands out a clone sharing the same buffers
impl ChannelOpener for MemoryChannel {
    fn open(
        &self,
        _port: &str,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        Ok(Box::new(self.clone()))
    }
}

impl CommunicationChannel for MemoryChannel {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        Ok(Box::new(self.clone()))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "read failure"));
        }
        Ok(state.inbound.len() as u32)
    }
}
