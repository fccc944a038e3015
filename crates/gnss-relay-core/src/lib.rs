//! # gnss-relay-core
//!
//! Core model of the GNSS stream relay.
//!
//! This crate provides:
//! - Stream endpoints and `kind://address[#format]` path parsing
//! - Protocol format tags
//! - Message filters with per-type minimum intervals
//! - Receiver command scripts
//! - Relay configuration and validation
//! - Per-stream status monitors and bitrate estimation
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! so it can be shared by the server, front ends and tools.

pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod format;
pub mod status;

pub use command::{CommandPhase, CommandScript, CommandStep, StreamRole};
pub use config::{
    AntennaInfo, EnuOffset, GeodeticPosition, ReceiverInfo, RelayConfig, RelayOptions,
    RelayPlan, StationOverrides, MAX_OUTPUTS,
};
pub use endpoint::{Address, Endpoint, StreamKind};
pub use error::{ConfigError, EndpointError};
pub use filter::{FilterGate, MessageFilter};
pub use format::StreamFormat;
pub use status::{RelayStatus, StreamMonitor, StreamState, StreamStats};
