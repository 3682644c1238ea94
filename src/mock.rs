//! Scripted in-memory link for exercising the protocols without hardware.

use crate::transport::Link;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
}

/// Each write is logged and answered with the next queued reply, if any.
/// Clones share state so a test can keep a handle after moving one into a channel.
#[derive(Clone, Default)]
pub(crate) struct MockLink {
    inner: Rc<RefCell<Inner>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response to the next write that has none yet.
    pub fn reply(&self, bytes: &[u8]) -> &Self {
        self.inner.borrow_mut().replies.push_back(bytes.to_vec());
        self
    }

    /// Make bytes readable immediately.
    pub fn preload(&self, bytes: &[u8]) {
        self.inner.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Every write so far, lossily decoded.
    pub fn writes(&self) -> Vec<String> {
        self.inner
            .borrow()
            .writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.inner.borrow_mut().writes.clear();
    }
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if inner.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(inner.rx.len());
        for (slot, byte) in buf.iter_mut().zip(inner.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        inner.writes.push(buf.to_vec());
        if let Some(reply) = inner.replies.pop_front() {
            inner.rx.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for MockLink {
    fn bytes_to_read(&self) -> io::Result<u32> {
        Ok(self.inner.borrow().rx.len() as u32)
    }

    fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input(&self) -> io::Result<()> {
        self.inner.borrow_mut().rx.clear();
        Ok(())
    }
}
