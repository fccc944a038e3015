//! Stream status tracking.
//!
//! Each stream owns a [`StreamMonitor`] that the relay engine updates on every
//! state transition and transfer, and that any other task may read through
//! [`StreamMonitor::snapshot`]. All fields live behind a single lock, so a
//! snapshot never mixes counters from different moments.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Window over which the bitrate is averaged.
pub const BITRATE_WINDOW: Duration = Duration::from_secs(2);

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Error,
    Closed,
    Waiting,
    Connecting,
    Active,
}

impl StreamState {
    /// Single-character code used on the status line.
    pub fn code(&self) -> char {
        match self {
            StreamState::Error => 'E',
            StreamState::Closed => '-',
            StreamState::Waiting => 'W',
            StreamState::Connecting | StreamState::Active => 'C',
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Error => "error",
            StreamState::Closed => "closed",
            StreamState::Waiting => "waiting",
            StreamState::Connecting => "connecting",
            StreamState::Active => "active",
        };
        f.write_str(name)
    }
}

/// Moving-window throughput estimate.
#[derive(Debug, Clone)]
pub struct BitrateMeter {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
    bytes_in_window: u64,
}

impl BitrateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            bytes_in_window: 0,
        }
    }

    /// Record `bytes` transferred at `now`.
    pub fn record(&mut self, now: Instant, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.samples.push_back((now, bytes));
        self.bytes_in_window += bytes;
        self.expire(now);
    }

    /// Average rate in bits per second over the window ending at `now`.
    pub fn bits_per_second(&mut self, now: Instant) -> u64 {
        self.expire(now);
        let secs = self.window.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        (self.bytes_in_window as f64 * 8.0 / secs) as u64
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.bytes_in_window = 0;
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.saturating_duration_since(at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.bytes_in_window -= bytes;
        }
    }
}

/// Point-in-time view of one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub state: StreamState,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub bitrate: u64,
    pub message: String,
}

impl StreamStats {
    /// Bytes moved through the stream in its dominant direction.
    pub fn bytes(&self) -> u64 {
        self.input_bytes.max(self.output_bytes)
    }
}

#[derive(Debug)]
struct MonitorInner {
    state: StreamState,
    input_bytes: u64,
    output_bytes: u64,
    last_activity: Option<Instant>,
    meter: BitrateMeter,
    message: String,
}

/// Shared, lock-protected status of one stream.
#[derive(Debug)]
pub struct StreamMonitor {
    inner: Mutex<MonitorInner>,
}

impl StreamMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                state: StreamState::Closed,
                input_bytes: 0,
                output_bytes: 0,
                last_activity: None,
                meter: BitrateMeter::new(BITRATE_WINDOW),
                message: String::new(),
            }),
        }
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: StreamState) {
        self.inner.lock().state = state;
    }

    /// Record bytes read from the stream.
    pub fn record_input(&self, bytes: usize) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.input_bytes += bytes as u64;
        inner.meter.record(now, bytes as u64);
        inner.last_activity = Some(now);
    }

    /// Record bytes written to the stream.
    pub fn record_output(&self, bytes: usize) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.output_bytes += bytes as u64;
        inner.meter.record(now, bytes as u64);
        inner.last_activity = Some(now);
    }

    /// Clear counters; called when a stream recovers from an error.
    pub fn reset_counters(&self) {
        let mut inner = self.inner.lock();
        inner.input_bytes = 0;
        inner.output_bytes = 0;
        inner.last_activity = None;
        inner.meter.reset();
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.inner.lock().last_activity
    }

    /// Replace the latest status message (converter output, handshake note).
    pub fn set_message(&self, message: impl Into<String>) {
        self.inner.lock().message = message.into();
    }

    pub fn snapshot(&self) -> StreamStats {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let bitrate = inner.meter.bits_per_second(now);
        StreamStats {
            state: inner.state,
            input_bytes: inner.input_bytes,
            output_bytes: inner.output_bytes,
            bitrate,
            message: inner.message.clone(),
        }
    }
}

impl Default for StreamMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the whole relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayStatus {
    pub input: StreamStats,
    pub outputs: Vec<StreamStats>,
}

impl RelayStatus {
    /// State codes, input first, e.g. `"CCE"`.
    pub fn state_codes(&self) -> String {
        std::iter::once(&self.input)
            .chain(self.outputs.iter())
            .map(|s| s.state.code())
            .collect()
    }

    /// Latest non-empty converter message of any output.
    pub fn message(&self) -> &str {
        self.outputs
            .iter()
            .map(|s| s.message.as_str())
            .find(|m| !m.is_empty())
            .unwrap_or(self.input.message.as_str())
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:>10} B {:>7} bps {}",
            self.state_codes(),
            self.input.input_bytes,
            self.input.bitrate,
            self.message()
        )
    }
}
