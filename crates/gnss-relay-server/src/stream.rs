//! Stream lifecycle.
//!
//! A [`Stream`] wraps one [`Transport`] with the state machine shared by
//! every endpoint kind:
//!
//! ```text
//! Closed --open--> Connecting --ok--> Active / Waiting
//!                             --err--> Error --reconnect interval--> Connecting
//! Active --I/O failure or inactivity timeout--> Error
//! ```
//!
//! The owning task is the only writer of the stream's [`StreamMonitor`];
//! status readers share it through an `Arc`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gnss_relay_core::{RelayOptions, StreamMonitor, StreamRole, StreamState};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::transport::Transport;

pub struct Stream {
    label: String,
    role: StreamRole,
    transport: Box<dyn Transport>,
    monitor: Arc<StreamMonitor>,
    timeout: Duration,
    reconnect_interval: Duration,
    retry_at: Option<Instant>,
    last_activity: Instant,
}

impl Stream {
    pub fn new(
        label: impl Into<String>,
        role: StreamRole,
        transport: Box<dyn Transport>,
        options: &RelayOptions,
    ) -> Self {
        Self {
            label: label.into(),
            role,
            transport,
            monitor: Arc::new(StreamMonitor::new()),
            timeout: options.timeout,
            reconnect_interval: options.reconnect_interval,
            retry_at: None,
            last_activity: Instant::now(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    pub fn monitor(&self) -> &Arc<StreamMonitor> {
        &self.monitor
    }

    pub fn state(&self) -> StreamState {
        self.monitor.state()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Active or waiting for a peer; I/O may be attempted.
    pub fn is_open(&self) -> bool {
        matches!(self.state(), StreamState::Active | StreamState::Waiting)
    }

    /// When the next reconnect attempt is due, if the stream is in error.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn retry_due(&self, now: Instant) -> bool {
        self.state() == StreamState::Error && self.retry_at.is_some_and(|at| now >= at)
    }

    /// Open the transport. Returns whether it succeeded.
    ///
    /// Counters restart when a stream recovers from an error.
    pub async fn open(&mut self) -> bool {
        let recovering = self.state() == StreamState::Error;
        self.monitor.set_state(StreamState::Connecting);
        debug!("{}: opening {}", self.label, self.transport.describe());

        match bounded(self.timeout, self.transport.open()).await {
            Ok(()) => {
                if recovering {
                    self.monitor.reset_counters();
                }
                self.retry_at = None;
                self.last_activity = Instant::now();
                self.refresh_state();
                info!("{}: {} {}", self.label, self.transport.describe(), self.state());
                true
            }
            Err(e) => {
                self.fail(e).await;
                false
            }
        }
    }

    /// Read available data. Errors move the stream to `Error` and read as 0.
    pub async fn read(&mut self, buf: &mut [u8]) -> usize {
        if !self.is_open() {
            return 0;
        }
        match self.transport.read(buf).await {
            Ok(n) => {
                if n > 0 {
                    trace!("{}: read {} bytes", self.label, n);
                    self.monitor.record_input(n);
                    self.last_activity = Instant::now();
                }
                self.refresh_state();
                n
            }
            Err(e) => {
                self.fail(e).await;
                0
            }
        }
    }

    /// Write `data`, bounded by the stream timeout. Returns the bytes
    /// delivered; data offered to a stream that is not open is discarded.
    pub async fn write(&mut self, data: &[u8]) -> usize {
        if !self.is_open() || data.is_empty() {
            return 0;
        }
        match bounded(self.timeout, self.transport.write(data)).await {
            Ok(n) => {
                if n > 0 {
                    trace!("{}: wrote {} bytes", self.label, n);
                    self.monitor.record_output(n);
                    self.last_activity = Instant::now();
                }
                self.refresh_state();
                n
            }
            Err(e) => {
                self.fail(e).await;
                0
            }
        }
    }

    /// Force an active stream that saw no traffic for the timeout into
    /// `Error`, for kinds with dead-peer detection. A zero timeout never
    /// expires.
    pub async fn check_inactivity(&mut self, now: Instant) {
        if self.timeout.is_zero()
            || self.state() != StreamState::Active
            || !self.transport.kind().has_inactivity_timeout()
        {
            return;
        }
        if now.saturating_duration_since(self.last_activity) > self.timeout {
            self.fail(TransportError::Timeout(self.timeout)).await;
        }
    }

    pub async fn close(&mut self) {
        self.transport.close().await;
        self.retry_at = None;
        self.monitor.set_state(StreamState::Closed);
        info!("{}: {} closed", self.label, self.transport.describe());
    }

    /// Record a status note, e.g. the last converted message.
    pub fn set_message(&self, message: impl Into<String>) {
        self.monitor.set_message(message);
    }

    async fn fail(&mut self, error: TransportError) {
        warn!("{}: {} error: {}", self.label, self.transport.describe(), error);
        self.transport.close().await;
        self.monitor.set_state(StreamState::Error);
        self.retry_at = Some(Instant::now() + self.reconnect_interval);
    }

    fn refresh_state(&self) {
        let state = if self.transport.is_waiting() {
            StreamState::Waiting
        } else {
            StreamState::Active
        };
        if self.monitor.state() != state {
            self.monitor.set_state(state);
        }
    }
}

/// Run one transport operation, failing it after `limit` unless zero.
async fn bounded<T>(
    limit: Duration,
    io: impl Future<Output = TransportResult<T>>,
) -> TransportResult<T> {
    if limit.is_zero() {
        return io.await;
    }
    tokio::time::timeout(limit, io)
        .await
        .unwrap_or(Err(TransportError::Timeout(limit)))
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("label", &self.label)
            .field("role", &self.role)
            .field("transport", &self.transport.describe())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use gnss_relay_core::StreamKind;

    fn options() -> RelayOptions {
        RelayOptions {
            timeout: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(5),
            ..RelayOptions::default()
        }
    }

    #[tokio::test]
    async fn test_open_read_write() {
        let (transport, handle) = MemoryTransport::source(b"1234");
        let mut stream = Stream::new("in", StreamRole::Input, Box::new(transport), &options());
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(stream.read(&mut [0u8; 8]).await, 0);
        assert_eq!(handle.open_count(), 0);

        assert!(stream.open().await);
        assert_eq!(stream.state(), StreamState::Active);
        assert_eq!(stream.read(&mut [0u8; 8]).await, 4);
        assert_eq!(stream.write(b"gga").await, 3);

        let stats = stream.monitor().snapshot();
        assert_eq!(stats.input_bytes, 4);
        assert_eq!(stats.output_bytes, 3);
        assert_eq!(handle.written(), b"gga");

        stream.close().await;
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_schedules_retry() {
        let (transport, handle) = MemoryTransport::sink();
        let mut stream = Stream::new("out", StreamRole::Output, Box::new(transport), &options());
        assert!(stream.open().await);
        assert_eq!(stream.write(b"abc").await, 3);

        handle.fail_on_write(2);
        let failed_at = Instant::now();
        assert_eq!(stream.write(b"def").await, 0);
        assert_eq!(stream.state(), StreamState::Error);
        assert_eq!(stream.retry_at(), Some(failed_at + Duration::from_secs(5)));
        assert!(!stream.retry_due(failed_at + Duration::from_millis(4999)));
        assert!(stream.retry_due(failed_at + Duration::from_secs(5)));

        // Data offered while in error is dropped.
        assert_eq!(stream.write(b"ghi").await, 0);
        assert_eq!(handle.write_count(), 2);

        // Recovery resets the counters.
        assert!(stream.open().await);
        assert_eq!(stream.monitor().snapshot().output_bytes, 0);
        assert_eq!(stream.write(b"jkl").await, 3);
        assert_eq!(handle.written(), b"abcjkl");
    }

    #[tokio::test]
    async fn test_failed_open() {
        let (transport, handle) = MemoryTransport::sink();
        handle.set_fail_open(true);
        let mut stream = Stream::new("out", StreamRole::Output, Box::new(transport), &options());
        assert!(!stream.open().await);
        assert_eq!(stream.state(), StreamState::Error);
        assert!(stream.retry_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout_by_kind() {
        let (serial, _serial_handle) = MemoryTransport::source(b"");
        let mut serial = Stream::new(
            "in",
            StreamRole::Input,
            Box::new(serial.with_kind(StreamKind::Serial)),
            &options(),
        );
        let (file, _file_handle) = MemoryTransport::source(b"");
        let mut file = Stream::new("in", StreamRole::Input, Box::new(file), &options());
        assert!(serial.open().await);
        assert!(file.open().await);

        let later = Instant::now() + Duration::from_millis(1500);
        serial.check_inactivity(later).await;
        file.check_inactivity(later).await;
        assert_eq!(serial.state(), StreamState::Error);
        assert_eq!(file.state(), StreamState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_never_expires() {
        let (serial, handle) = MemoryTransport::source(b"");
        let mut stream = Stream::new(
            "in",
            StreamRole::Input,
            Box::new(serial.with_kind(StreamKind::Serial)),
            &RelayOptions {
                timeout: Duration::ZERO,
                ..options()
            },
        );
        assert!(stream.open().await);

        stream.check_inactivity(Instant::now() + Duration::from_secs(3600)).await;
        assert_eq!(stream.state(), StreamState::Active);
        assert_eq!(stream.write(b"gga").await, 3);
        assert_eq!(handle.written(), b"gga");
        assert_eq!(stream.state(), StreamState::Active);
    }
}
