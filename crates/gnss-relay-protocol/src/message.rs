//! Decoded protocol messages.

use bytes::Bytes;
use gnss_relay_core::StreamFormat;

/// One complete, checksum-verified frame taken from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Protocol the frame was decoded from.
    pub format: StreamFormat,
    /// Protocol specific message type (RTCM number, UBX class/id, ...).
    pub msg_type: u16,
    /// The whole frame as received, header and checksum included.
    pub frame: Bytes,
    /// The message body inside the frame.
    pub payload: Bytes,
}

impl Message {
    /// Size of the frame on the wire.
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }
}
