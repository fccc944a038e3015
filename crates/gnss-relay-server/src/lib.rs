//! # gnss-relay-server
//!
//! Stream relay server for GNSS data.
//!
//! This crate provides:
//! - Transports for files, serial ports, TCP and NTRIP
//! - The [`Stream`] state machine with reconnect and timeout handling
//! - The [`RelayServer`] engine fanning one input out to many outputs
//! - Receiver command injection and NMEA GGA requests
//!
//! Runs on the tokio runtime.

pub mod commands;
pub mod error;
pub mod nmea;
pub mod server;
pub mod stream;
pub mod transport;

pub use error::{RelayError, Result, TransportError, TransportResult};
pub use server::{RelayServer, StatusHandle};
pub use stream::Stream;
pub use transport::{MemoryHandle, MemoryTransport, Transport};

pub use gnss_relay_core::{RelayConfig, RelayOptions, RelayStatus, StreamState};
