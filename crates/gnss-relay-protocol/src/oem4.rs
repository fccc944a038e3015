//! NovAtel OEM4/OEMV/OEM6 binary framing.
//!
//! `AA 44 12 hlen` followed by the rest of the binary header, the message
//! body and a CRC-32 (little endian) over header and body. The message id
//! is the u16 at offset 4, the body length the u16 at offset 8.

use gnss_relay_core::StreamFormat;

use crate::crc::crc32;
use crate::framing::{FrameDecoder, Framing, Rejection, Scan};

const SYNC: [u8; 3] = [0xAA, 0x44, 0x12];

/// Length of the long binary header.
pub const HEADER_LEN: usize = 28;

#[derive(Debug, Default)]
pub struct Oem4Framing;

pub type Oem4Decoder = FrameDecoder<Oem4Framing>;

impl Framing for Oem4Framing {
    const FORMAT: StreamFormat = StreamFormat::Nov;

    fn sync(&self) -> &'static [u8] {
        &SYNC
    }

    fn scan(&self, buf: &[u8]) -> Scan {
        if buf.len() < 10 {
            return Scan::Incomplete;
        }
        let header_len = usize::from(buf[3]);
        if header_len < HEADER_LEN {
            return Scan::Invalid(Rejection::Header);
        }
        let body_len = usize::from(u16::from_le_bytes([buf[8], buf[9]]));
        let total = header_len + body_len + 4;
        if total > Self::MAX_LEN {
            return Scan::Invalid(Rejection::Header);
        }
        if buf.len() < total {
            return Scan::Incomplete;
        }
        let crc = u32::from_le_bytes([
            buf[total - 4],
            buf[total - 3],
            buf[total - 2],
            buf[total - 1],
        ]);
        if crc32(&buf[..total - 4]) != crc {
            return Scan::Invalid(Rejection::Checksum);
        }
        Scan::Frame {
            len: total,
            msg_type: u16::from_le_bytes([buf[4], buf[5]]),
            payload: header_len..header_len + body_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoder;

    fn frame(id: u16, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        out[..3].copy_from_slice(&SYNC);
        out[3] = HEADER_LEN as u8;
        out[4..6].copy_from_slice(&id.to_le_bytes());
        out[8..10].copy_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(body);
        let crc = crc32(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    #[test]
    fn test_decode_rangecmp() {
        let mut decoder = Oem4Decoder::new(Oem4Framing);
        let data = frame(140, &[0xAB; 24]);
        for chunk in data.chunks(7) {
            decoder.push(chunk);
        }
        let msg = decoder.next_message().unwrap();
        assert_eq!(msg.format, StreamFormat::Nov);
        assert_eq!(msg.msg_type, 140);
        assert_eq!(msg.payload.len(), 24);
        assert_eq!(msg.len(), HEADER_LEN + 24 + 4);
    }

    #[test]
    fn test_short_header_rejected() {
        let mut decoder = Oem4Decoder::new(Oem4Framing);
        let mut data = frame(43, &[1, 2]);
        data[3] = 12;
        decoder.push(&data);
        decoder.push(&frame(43, &[1, 2]));
        assert_eq!(decoder.next_message().map(|m| m.msg_type), Some(43));
        assert_eq!(decoder.stats().checksum_errors, 0);
    }

    #[test]
    fn test_oversized_body_length_is_noise() {
        let mut decoder = Oem4Decoder::new(Oem4Framing);
        let mut noise = frame(43, &[]);
        noise[8..10].copy_from_slice(&0xFFFFu16.to_le_bytes());
        noise.truncate(HEADER_LEN);
        decoder.push(&noise);
        decoder.push(&frame(43, &[1; 44]));

        assert_eq!(decoder.next_message().map(|m| m.msg_type), Some(43));
        assert_eq!(decoder.buffered(), 0);
    }
}
