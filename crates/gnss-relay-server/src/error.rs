//! Server errors.

use std::time::Duration;

use gnss_relay_core::ConfigError;
use gnss_relay_protocol::CodecError;
use thiserror::Error;

/// Failure of a single transport operation.
///
/// These never stop the relay: the engine logs them, moves the stream to
/// the error state and retries after the reconnect interval.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Stream is not open")]
    NotOpen,
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors that prevent a relay from being built.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("No output {index}; the relay has {count}")]
    NoSuchOutput { index: usize, count: usize },

    #[error("Output {index} converter: {source}")]
    Converter {
        index: usize,
        #[source]
        source: CodecError,
    },
}

pub type Result<T> = std::result::Result<T, RelayError>;
