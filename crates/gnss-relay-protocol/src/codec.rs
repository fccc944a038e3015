//! Decoder and encoder capabilities.
//!
//! The relay depends only on these two traits. Concrete protocols are
//! registered in a [`CodecRegistry`](crate::registry::CodecRegistry) under
//! their format tag.

use bytes::BytesMut;
use gnss_relay_core::StreamFormat;

use crate::error::CodecError;
use crate::message::Message;

/// Counters describing how a decoder dealt with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Frames decoded successfully.
    pub messages: u64,
    /// Bytes discarded while searching for a frame start.
    pub skipped_bytes: u64,
    /// Candidate frames rejected by their checksum.
    pub checksum_errors: u64,
}

/// Incremental stream decoder.
///
/// Bytes may arrive in chunks of any size, one byte at a time included.
/// Decoder state is kept across calls, so a frame split over several pushes
/// is returned once its last byte arrives. Malformed input is never an error:
/// it is skipped until the next plausible frame start.
pub trait Decoder: Send {
    /// Protocol this decoder understands.
    fn format(&self) -> StreamFormat;

    /// Append raw stream bytes.
    fn push(&mut self, data: &[u8]);

    /// Take the next complete message, if one is buffered.
    fn next_message(&mut self) -> Option<Message>;

    /// Decoding counters.
    fn stats(&self) -> DecodeStats;
}

/// Message encoder for an output protocol.
pub trait Encoder: Send {
    /// Protocol this encoder produces.
    fn format(&self) -> StreamFormat;

    /// Append the encoding of `msg` to `out`.
    ///
    /// Returns `Ok(false)` when the message cannot be represented in the
    /// target protocol; nothing is written in that case.
    fn encode(&mut self, msg: &Message, out: &mut BytesMut) -> Result<bool, CodecError>;

    /// Append a station description message built from configuration alone,
    /// for inputs that carry no such message themselves.
    ///
    /// Returns `Ok(false)` when `msg_type` is not a station message of the
    /// target protocol or the configuration lacks the data for it.
    fn station_message(&mut self, msg_type: u16, out: &mut BytesMut) -> Result<bool, CodecError> {
        let _ = (msg_type, out);
        Ok(false)
    }

    /// Append any partially assembled output. Called once before the encoder
    /// is dropped.
    fn flush(&mut self, out: &mut BytesMut) {
        let _ = out;
    }
}
