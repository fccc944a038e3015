//! u-blox UBX framing.
//!
//! `B5 62 class id len(u16 LE) payload ck_a ck_b`, Fletcher-8 over
//! everything between the sync bytes and the checksum. The message type is
//! `class << 8 | id` (e.g. `0x0215` for RXM-RAWX).

use gnss_relay_core::StreamFormat;

use crate::crc::fletcher8;
use crate::framing::{FrameDecoder, Framing, Rejection, Scan};

const SYNC: [u8; 2] = [0xB5, 0x62];
const HEADER_LEN: usize = 6;

#[derive(Debug, Default)]
pub struct UbxFraming;

pub type UbxDecoder = FrameDecoder<UbxFraming>;

impl Framing for UbxFraming {
    const FORMAT: StreamFormat = StreamFormat::Ubx;

    fn sync(&self) -> &'static [u8] {
        &SYNC
    }

    fn scan(&self, buf: &[u8]) -> Scan {
        if buf.len() < HEADER_LEN {
            return Scan::Incomplete;
        }
        let len = usize::from(u16::from_le_bytes([buf[4], buf[5]]));
        let total = HEADER_LEN + len + 2;
        if total > Self::MAX_LEN {
            return Scan::Invalid(Rejection::Header);
        }
        if buf.len() < total {
            return Scan::Incomplete;
        }
        let (ck_a, ck_b) = fletcher8(&buf[2..HEADER_LEN + len]);
        if ck_a != buf[total - 2] || ck_b != buf[total - 1] {
            return Scan::Invalid(Rejection::Checksum);
        }
        Scan::Frame {
            len: total,
            msg_type: u16::from_be_bytes([buf[2], buf[3]]),
            payload: HEADER_LEN..HEADER_LEN + len,
        }
    }
}

/// Build a UBX frame around `payload`.
pub fn frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + 2);
    out.extend_from_slice(&SYNC);
    out.extend_from_slice(&[class, id]);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    let (ck_a, ck_b) = fletcher8(&out[2..]);
    out.extend_from_slice(&[ck_a, ck_b]);
    out
}
