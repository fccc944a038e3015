//! Configuration-time errors.
//!
//! Everything in this module is reported before any stream is opened. Runtime
//! failures (transport faults, decode errors) are never represented here.

use thiserror::Error;

/// Errors raised while parsing a stream path.
#[derive(Debug, Error, PartialEq)]
pub enum EndpointError {
    /// The `kind://` prefix is not one of the supported transport kinds.
    #[error("Unknown stream kind: {0}")]
    UnknownKind(String),

    /// The `#format` suffix is not a known protocol tag.
    #[error("Unknown stream format: {0}")]
    UnknownFormat(String),

    /// The kind-specific address could not be parsed.
    #[error("Invalid {kind} address '{address}': {reason}")]
    InvalidAddress {
        kind: &'static str,
        address: String,
        reason: String,
    },

    /// The stream kind cannot be used in the requested role.
    #[error("{kind} stream cannot be used as {role}")]
    UnsupportedRole {
        kind: &'static str,
        role: &'static str,
    },

    /// The format cannot be produced on an output.
    #[error("Format {0} is input only")]
    InputOnlyFormat(String),
}

/// Errors raised while validating a relay configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A stream path failed to parse or validate.
    #[error("Stream path error in '{path}': {source}")]
    Endpoint {
        path: String,
        #[source]
        source: EndpointError,
    },

    /// The message filter string is malformed.
    #[error("Invalid message filter entry '{0}'")]
    InvalidFilter(String),

    /// No output stream was configured.
    #[error("No output streams configured")]
    NoOutputs,

    /// More output streams than the server supports.
    #[error("Too many output streams: {count} (maximum {max})")]
    TooManyOutputs { count: usize, max: usize },

    /// An output requests conversion but the input carries no format tag.
    #[error("Output '{0}' requests format conversion but the input has no #format")]
    MissingInputFormat(String),

    /// A scalar option is out of range.
    #[error("Invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for this schema.
    #[error("Invalid configuration data: {0}")]
    Json(#[from] serde_json::Error),
}
