//! SkyTraq binary framing: `A0 A1 len(u16 BE) payload xor 0D 0A`.

use gnss_relay_core::StreamFormat;

use crate::crc::xor8;
use crate::framing::{FrameDecoder, Framing, Rejection, Scan};

const SYNC: [u8; 2] = [0xA0, 0xA1];

#[derive(Debug, Default)]
pub struct SkytraqFraming;

pub type SkytraqDecoder = FrameDecoder<SkytraqFraming>;

impl Framing for SkytraqFraming {
    const FORMAT: StreamFormat = StreamFormat::Stq;

    fn sync(&self) -> &'static [u8] {
        &SYNC
    }

    fn scan(&self, buf: &[u8]) -> Scan {
        if buf.len() < 4 {
            return Scan::Incomplete;
        }
        let len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
        if len == 0 {
            return Scan::Invalid(Rejection::Header);
        }
        let total = len + 7;
        if total > Self::MAX_LEN {
            return Scan::Invalid(Rejection::Header);
        }
        if buf.len() < total {
            return Scan::Incomplete;
        }
        if buf[total - 2..total] != [0x0D, 0x0A] {
            return Scan::Invalid(Rejection::Header);
        }
        if xor8(&buf[4..4 + len]) != buf[4 + len] {
            return Scan::Invalid(Rejection::Checksum);
        }
        Scan::Frame {
            len: total,
            msg_type: u16::from(buf[4]),
            payload: 4..4 + len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoder;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = SYNC.to_vec();
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out.push(xor8(payload));
        out.extend_from_slice(&[0x0D, 0x0A]);
        out
    }

    #[test]
    fn test_decode_raw_measurement() {
        let mut decoder = SkytraqDecoder::new(SkytraqFraming);
        decoder.push(&frame(&[0xDD, 0x01, 0x02]));
        decoder.push(&frame(&[0xDC, 0x00]));
        let types: Vec<u16> = std::iter::from_fn(|| decoder.next_message())
            .map(|m| m.msg_type)
            .collect();
        assert_eq!(types, vec![0xDD, 0xDC]);
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let mut decoder = SkytraqDecoder::new(SkytraqFraming);
        let mut bad = frame(&[0xDD, 0x01]);
        let n = bad.len();
        bad[n - 1] = 0x00;
        decoder.push(&bad);
        assert!(decoder.next_message().is_none());
        assert_eq!(decoder.stats().checksum_errors, 0);
    }
}
