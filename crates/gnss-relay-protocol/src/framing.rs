//! Generic streaming frame decoder.
//!
//! Every supported binary protocol has the same shape: a fixed sync prefix,
//! a header carrying the body length, the body, and a checksum. A protocol
//! only describes that shape through [`Framing`]; [`FrameDecoder`] owns the
//! buffering and the resynchronization after garbage or corrupt frames.

use std::ops::Range;

use bytes::{Buf, BytesMut};
use gnss_relay_core::StreamFormat;

use crate::codec::{DecodeStats, Decoder};
use crate::message::Message;

/// Longest frame any receiver protocol produces. Longer length fields are
/// taken as noise.
pub const MAX_FRAME_LEN: usize = 16_384;

/// Why a candidate frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Header fields are impossible for this protocol.
    Header,
    /// The frame is complete but its checksum does not match.
    Checksum,
}

/// Result of examining a buffer that starts with the sync prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// More bytes are needed to decide.
    Incomplete,
    /// Not a frame; the decoder drops one byte and searches again.
    Invalid(Rejection),
    /// A complete frame of `len` bytes.
    Frame {
        len: usize,
        msg_type: u16,
        payload: Range<usize>,
    },
}

/// Shape of one protocol's frames.
pub trait Framing: Send {
    const FORMAT: StreamFormat;

    /// Upper bound on a whole frame, sync to checksum.
    const MAX_LEN: usize = MAX_FRAME_LEN;

    /// Bytes every frame starts with.
    fn sync(&self) -> &'static [u8];

    /// Examine `buf`, which always begins with [`Framing::sync`].
    ///
    /// A header announcing more than [`Framing::MAX_LEN`] bytes must be
    /// rejected before waiting for the body.
    fn scan(&self, buf: &[u8]) -> Scan;
}

/// Decoder for any [`Framing`].
#[derive(Debug)]
pub struct FrameDecoder<F> {
    framing: F,
    buf: BytesMut,
    stats: DecodeStats,
}

impl<F: Framing> FrameDecoder<F> {
    pub fn new(framing: F) -> Self {
        Self {
            framing,
            buf: BytesMut::with_capacity(4096),
            stats: DecodeStats::default(),
        }
    }

    /// Bytes currently buffered and not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Move the buffer start to the next sync prefix.
    ///
    /// Returns `false` when no complete prefix is buffered. A partial prefix
    /// at the end of the buffer is kept for the next push.
    fn resync(&mut self) -> bool {
        let sync = self.framing.sync();
        if let Some(pos) = find(&self.buf, sync) {
            self.skip(pos);
            return true;
        }
        let keep = (1..sync.len())
            .rev()
            .find(|&n| n <= self.buf.len() && self.buf[self.buf.len() - n..] == sync[..n])
            .unwrap_or(0);
        let drop = self.buf.len() - keep;
        self.skip(drop);
        false
    }

    fn skip(&mut self, n: usize) {
        if n > 0 {
            self.buf.advance(n);
            self.stats.skipped_bytes += n as u64;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|&b| b == needle[0]);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl<F: Framing> Decoder for FrameDecoder<F> {
    fn format(&self) -> StreamFormat {
        F::FORMAT
    }

    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn next_message(&mut self) -> Option<Message> {
        loop {
            if !self.resync() {
                return None;
            }
            match self.framing.scan(&self.buf) {
                Scan::Incomplete => return None,
                Scan::Invalid(rejection) => {
                    if rejection == Rejection::Checksum {
                        self.stats.checksum_errors += 1;
                    }
                    self.skip(1);
                }
                Scan::Frame {
                    len,
                    msg_type,
                    payload,
                } => {
                    let frame = self.buf.split_to(len).freeze();
                    self.stats.messages += 1;
                    return Some(Message {
                        format: F::FORMAT,
                        msg_type,
                        payload: frame.slice(payload),
                        frame,
                    });
                }
            }
        }
    }

    fn stats(&self) -> DecodeStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `AB len body xor` with a one byte type at the start of the body.
    struct TestFraming;

    impl Framing for TestFraming {
        const FORMAT: StreamFormat = StreamFormat::Binex;

        fn sync(&self) -> &'static [u8] {
            b"AB"
        }

        fn scan(&self, buf: &[u8]) -> Scan {
            if buf.len() < 3 {
                return Scan::Incomplete;
            }
            let len = usize::from(buf[2]);
            if len == 0 {
                return Scan::Invalid(Rejection::Header);
            }
            if buf.len() < 4 + len {
                return Scan::Incomplete;
            }
            let sum = buf[3..3 + len].iter().fold(0u8, |a, b| a ^ b);
            if sum != buf[3 + len] {
                return Scan::Invalid(Rejection::Checksum);
            }
            Scan::Frame {
                len: 4 + len,
                msg_type: u16::from(buf[3]),
                payload: 3..3 + len,
            }
        }
    }

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = b"AB".to_vec();
        out.push(body.len() as u8);
        out.extend_from_slice(body);
        out.push(body.iter().fold(0u8, |a, b| a ^ b));
        out
    }

    fn drain(decoder: &mut FrameDecoder<TestFraming>) -> Vec<Message> {
        std::iter::from_fn(|| decoder.next_message()).collect()
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut decoder = FrameDecoder::new(TestFraming);
        let data = [frame(&[7, 1, 2]), frame(&[9])].concat();
        let mut messages = Vec::new();
        for b in &data {
            decoder.push(std::slice::from_ref(b));
            messages.extend(drain(&mut decoder));
        }
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].msg_type, 7);
        assert_eq!(&messages[0].payload[..], &[7, 1, 2]);
        assert_eq!(messages[1].msg_type, 9);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_resync_after_garbage_and_bad_checksum() {
        let mut decoder = FrameDecoder::new(TestFraming);
        let mut corrupt = frame(&[5, 5]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        decoder.push(b"xyzA");
        decoder.push(&frame(&[1])[1..]);
        decoder.push(&corrupt);
        decoder.push(b"AB\0");
        decoder.push(&frame(&[2]));

        let types: Vec<u16> = drain(&mut decoder).iter().map(|m| m.msg_type).collect();
        assert_eq!(types, vec![1, 2]);

        let stats = decoder.stats();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.checksum_errors, 1);
        assert!(stats.skipped_bytes >= 3);
    }

    #[test]
    fn test_partial_sync_is_kept() {
        let mut decoder = FrameDecoder::new(TestFraming);
        decoder.push(b"garbageA");
        assert!(decoder.next_message().is_none());
        assert_eq!(decoder.buffered(), 1);
        decoder.push(&frame(&[3])[1..]);
        assert_eq!(decoder.next_message().map(|m| m.msg_type), Some(3));
    }
}
