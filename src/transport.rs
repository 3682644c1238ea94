//! Byte-level transport over a serial link.
//!
//! A [`Channel`] owns exactly one open link. Protocol objects are built on top
//! of a channel and are its only user for the duration of a device session.

use crate::error::{Result, RigError};
use crate::types::ConnectionParams;
use log::trace;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// A duplex byte stream that can report and discard pending input.
pub trait Link: Read + Write {
    /// Number of bytes that can be read without blocking
    fn bytes_to_read(&self) -> io::Result<u32>;

    /// Upper bound on how long a single `read` may block
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard everything the driver has buffered on the input side
    fn clear_input(&self) -> io::Result<()>;
}

impl Link for Box<dyn SerialPort> {
    fn bytes_to_read(&self) -> io::Result<u32> {
        Ok((**self).bytes_to_read()?)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        Ok((**self).set_timeout(timeout)?)
    }

    fn clear_input(&self) -> io::Result<()> {
        Ok((**self).clear(serialport::ClearBuffer::Input)?)
    }
}

/// Open serial connection, `Open` until [`close`](Channel::close) is called.
pub struct Channel<L: Link = Box<dyn SerialPort>> {
    link: Option<L>,
    params: ConnectionParams,
}

impl Channel {
    /// Open the serial port described by `params`.
    pub fn open(params: ConnectionParams) -> Result<Self> {
        params.validate()?;
        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(params.timeout)
            .open()
            .inspect_err(|e| {
                log::warn!("Failed to open {} at {} baud: {e}", params.port, params.baud_rate)
            })?;
        log::debug!("Opened {} at {} baud", params.port, params.baud_rate);
        Ok(Self::from_link(port, params))
    }
}

impl<L: Link> Channel<L> {
    /// Wrap an already open link.
    pub fn from_link(link: L, params: ConnectionParams) -> Self {
        Channel {
            link: Some(link),
            params,
        }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn link(&mut self) -> Result<&mut L> {
        let port = &self.params.port;
        self.link
            .as_mut()
            .ok_or_else(|| RigError::Connection(format!("channel {port} is closed")))
    }

    /// Write raw bytes.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("Sending:  {:02X?}", bytes);
        let link = self.link()?;
        link.write_all(bytes)?;
        link.flush()?;
        Ok(())
    }

    /// Drain whatever the driver has buffered without waiting for more.
    pub fn receive_available(&mut self) -> Result<Vec<u8>> {
        let link = self.link()?;
        let mut received = Vec::new();
        loop {
            let pending = link.bytes_to_read()? as usize;
            if pending == 0 {
                break;
            }
            let mut chunk = vec![0u8; pending];
            match link.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        if !received.is_empty() {
            trace!("Received: {:02X?}", received);
        }
        Ok(received)
    }

    /// Accumulate bytes until `predicate` accepts them or `timeout` elapses.
    pub fn receive_until<F>(&mut self, mut predicate: F, timeout: Duration) -> Result<Vec<u8>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let byte_timeout = self.params.timeout;
        let link = self.link()?;
        let mut received = Vec::new();
        let mut chunk = [0u8; 64];

        let outcome = loop {
            if predicate(&received) {
                break Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(RigError::timeout("response", timeout));
            }
            if let Err(e) = link.set_read_timeout(remaining) {
                break Err(e.into());
            }
            match link.read(&mut chunk) {
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
                Err(e) => break Err(e.into()),
            }
        };

        // Restore the per-byte timeout the channel was opened with
        link.set_read_timeout(byte_timeout)?;
        if !received.is_empty() {
            trace!("Received: {:02X?}", received);
        }
        outcome.map(|()| received)
    }

    /// Discard stale input, both in the driver and anything already readable.
    pub fn flush_input(&mut self) -> Result<()> {
        self.link()?.clear_input()?;
        let stale = self.receive_available()?;
        if !stale.is_empty() {
            log::debug!("Discarded {} stale bytes", stale.len());
        }
        Ok(())
    }

    /// Release the link. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            log::debug!("Closed {}", self.params.port);
        }
    }
}

impl<L: Link> Drop for Channel<L> {
    fn drop(&mut self) {
        self.close();
    }
}
