//! Codec errors.

use gnss_relay_core::StreamFormat;
use thiserror::Error;

/// Errors raised by decoders, encoders and the codec registry.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No decoder is registered for the format.
    #[error("No decoder available for format {0}")]
    NoDecoder(StreamFormat),

    /// No encoder is registered for the format.
    #[error("No encoder available for format {0}")]
    NoEncoder(StreamFormat),

    /// A message body is too short or internally inconsistent.
    #[error("Malformed {format} message {msg_type}: {reason}")]
    Malformed {
        format: StreamFormat,
        msg_type: u16,
        reason: String,
    },

    /// A field does not fit the target encoding.
    #[error("Field {field} out of range for message {msg_type}")]
    FieldOverflow { msg_type: u16, field: &'static str },
}
