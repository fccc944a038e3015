use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use gnss_relay_core::StreamKind;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::Transport;
use crate::error::{TransportError, TransportResult};

#[derive(Debug)]
struct MemoryState {
    pending: VecDeque<u8>,
    written: Vec<u8>,
    chunk_size: usize,
    open_times: Vec<Instant>,
    close_count: usize,
    write_count: usize,
    fail_on_write: Option<usize>,
    fail_open: bool,
}

/// Shared view of a [`MemoryTransport`], kept by whoever created it.
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHandle {
    /// Queue bytes to be returned by later reads.
    pub fn push_input(&self, data: &[u8]) {
        self.state.lock().pending.extend(data);
    }

    /// True when every queued input byte has been read.
    pub fn is_drained(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_times.len()
    }

    /// Instants of every `open` call, failed ones included.
    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().open_times.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().write_count
    }

    /// Make the `n`-th write call (counting from 1) fail.
    pub fn fail_on_write(&self, n: usize) {
        self.state.lock().fail_on_write = Some(n);
    }

    /// Make every `open` fail until cleared.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }
}

/// In-process transport: reads come from a queue, writes go to a buffer.
#[derive(Debug)]
pub struct MemoryTransport {
    kind: StreamKind,
    state: Arc<Mutex<MemoryState>>,
    open: bool,
}

impl MemoryTransport {
    /// A transport serving `data` to its reader.
    pub fn source(data: &[u8]) -> (Self, MemoryHandle) {
        let (transport, handle) = Self::sink();
        handle.push_input(data);
        (transport, handle)
    }

    /// A transport collecting whatever is written to it.
    pub fn sink() -> (Self, MemoryHandle) {
        let state = Arc::new(Mutex::new(MemoryState {
            pending: VecDeque::new(),
            written: Vec::new(),
            chunk_size: usize::MAX,
            open_times: Vec::new(),
            close_count: 0,
            write_count: 0,
            fail_on_write: None,
            fail_open: false,
        }));
        let transport = Self {
            kind: StreamKind::File,
            state: state.clone(),
            open: false,
        };
        (transport, MemoryHandle { state })
    }

    /// Report a different endpoint kind, e.g. to exercise command injection.
    pub fn with_kind(mut self, kind: StreamKind) -> Self {
        self.kind = kind;
        self
    }

    /// Limit each read to `size` bytes.
    pub fn with_chunk_size(self, size: usize) -> Self {
        self.state.lock().chunk_size = size.max(1);
        self
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn open(&mut self) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.open_times.push(Instant::now());
        if state.fail_open {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory transport refused open",
            )));
        }
        self.open = true;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let mut state = self.state.lock();
        let n = buf.len().min(state.chunk_size).min(state.pending.len());
        for (slot, byte) in buf.iter_mut().zip(state.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let mut state = self.state.lock();
        state.write_count += 1;
        if state.fail_on_write == Some(state.write_count) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "memory transport write failure",
            )));
        }
        state.written.extend_from_slice(data);
        Ok(data.len())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().close_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_and_sink() {
        let (source, input) = MemoryTransport::source(b"abcdef");
        let mut source = source.with_chunk_size(4);
        let mut buf = [0u8; 16];
        assert!(matches!(source.read(&mut buf).await, Err(TransportError::NotOpen)));

        source.open().await.unwrap();
        assert_eq!(source.read(&mut buf).await.unwrap(), 4);
        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);
        assert!(input.is_drained());

        let (mut sink, output) = MemoryTransport::sink();
        output.fail_on_write(2);
        sink.open().await.unwrap();
        assert_eq!(sink.write(b"12").await.unwrap(), 2);
        assert!(sink.write(b"34").await.is_err());
        assert_eq!(sink.write(b"56").await.unwrap(), 2);
        assert_eq!(output.written(), b"1256");
        sink.close().await;
        assert_eq!(output.close_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_open() {
        let (mut sink, handle) = MemoryTransport::sink();
        handle.set_fail_open(true);
        assert!(sink.open().await.is_err());
        handle.set_fail_open(false);
        assert!(sink.open().await.is_ok());
        assert_eq!(handle.open_count(), 2);
    }
}
