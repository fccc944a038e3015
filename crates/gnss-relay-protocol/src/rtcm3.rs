//! RTCM 3 framing and encoder.
//!
//! Frame layout: `D3`, 6 reserved zero bits, 10 bit payload length, payload,
//! CRC-24Q over everything before it. The message number is the first 12
//! bits of the payload.

use bytes::{BufMut, BytesMut};
use gnss_relay_core::{StationOverrides, StreamFormat};

use crate::bits::set_unsigned;
use crate::codec::Encoder;
use crate::crc::crc24q;
use crate::error::CodecError;
use crate::framing::{FrameDecoder, Framing, Rejection, Scan};
use crate::message::Message;
use crate::station::{self, Descriptors, ReferencePoint};

pub const PREAMBLE: u8 = 0xD3;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 1023;

#[derive(Debug, Default)]
pub struct Rtcm3Framing;

pub type Rtcm3Decoder = FrameDecoder<Rtcm3Framing>;

impl Framing for Rtcm3Framing {
    const FORMAT: StreamFormat = StreamFormat::Rtcm3;

    fn sync(&self) -> &'static [u8] {
        &[PREAMBLE]
    }

    fn scan(&self, buf: &[u8]) -> Scan {
        if buf.len() < 3 {
            return Scan::Incomplete;
        }
        if buf[1] & 0xFC != 0 {
            return Scan::Invalid(Rejection::Header);
        }
        let len = (usize::from(buf[1] & 0x03) << 8) | usize::from(buf[2]);
        let total = 3 + len + 3;
        if buf.len() < total {
            return Scan::Incomplete;
        }
        let crc = (u32::from(buf[total - 3]) << 16)
            | (u32::from(buf[total - 2]) << 8)
            | u32::from(buf[total - 1]);
        if crc24q(&buf[..3 + len]) != crc {
            return Scan::Invalid(Rejection::Checksum);
        }
        Scan::Frame {
            len: total,
            msg_type: station::message_type(&buf[3..3 + len]),
            payload: 3..3 + len,
        }
    }
}

/// Append a complete frame around `payload`.
pub fn frame(payload: &[u8], out: &mut BytesMut) -> Result<(), CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::FieldOverflow {
            msg_type: station::message_type(payload),
            field: "message length",
        });
    }
    let start = out.len();
    out.reserve(payload.len() + 6);
    out.put_u8(PREAMBLE);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    let crc = crc24q(&out[start..]);
    out.put_slice(&crc.to_be_bytes()[1..]);
    Ok(())
}

/// Whether the message carries a reference station id in bits 12..24.
pub fn carries_station_id(msg_type: u16) -> bool {
    matches!(msg_type, 1001..=1013 | 1029 | 1033 | 1230 | 1071..=1137)
}

/// RTCM 3 output encoder.
///
/// RTCM 3 input is passed through frame by frame. When overrides are
/// configured, station messages are rebuilt with the configured values and
/// the station id of observation messages is rewritten.
#[derive(Debug, Default)]
pub struct Rtcm3Encoder {
    overrides: StationOverrides,
}

impl Rtcm3Encoder {
    pub fn new(overrides: StationOverrides) -> Self {
        Self { overrides }
    }

    /// Rewritten payload, or `None` when the message is left as is.
    fn rewrite(&self, msg: &Message) -> Result<Option<Vec<u8>>, CodecError> {
        let payload = match msg.msg_type {
            1005 | 1006 => {
                let mut arp = ReferencePoint::decode(&msg.payload)?;
                arp.apply(&self.overrides);
                arp.encode()?
            }
            1007 | 1008 | 1033 => {
                let mut desc = Descriptors::decode(&msg.payload)?;
                desc.apply(&self.overrides);
                desc.encode()
            }
            t if carries_station_id(t) && msg.payload.len() >= 3 => {
                let Some(id) = self.overrides.station_id else {
                    return Ok(None);
                };
                let mut payload = msg.payload.to_vec();
                set_unsigned(&mut payload, 12, 12, u32::from(id));
                payload
            }
            _ => return Ok(None),
        };
        Ok(Some(payload))
    }
}

impl Encoder for Rtcm3Encoder {
    fn format(&self) -> StreamFormat {
        StreamFormat::Rtcm3
    }

    fn encode(&mut self, msg: &Message, out: &mut BytesMut) -> Result<bool, CodecError> {
        if msg.format != StreamFormat::Rtcm3 {
            return Ok(false);
        }
        if !self.overrides.is_empty() {
            if let Some(payload) = self.rewrite(msg)? {
                frame(&payload, out)?;
                return Ok(true);
            }
        }
        out.extend_from_slice(&msg.frame);
        Ok(true)
    }

    fn station_message(&mut self, msg_type: u16, out: &mut BytesMut) -> Result<bool, CodecError> {
        let o = &self.overrides;
        let station_id = o.station_id.unwrap_or(0);
        let payload = match msg_type {
            1005 | 1006 => {
                let Some(pos) = &o.position else {
                    return Ok(false);
                };
                let mut arp = ReferencePoint::new(station_id, station::geodetic_to_ecef(pos));
                if msg_type == 1006 {
                    arp.antenna_height = Some(0.0);
                }
                arp.apply(o);
                arp.encode()?
            }
            1007 | 1008 if o.antenna.is_some() => {
                let mut desc = Descriptors::new(msg_type, station_id);
                desc.apply(o);
                desc.encode()
            }
            1033 if o.antenna.is_some() || o.receiver.is_some() => {
                let mut desc = Descriptors::new(msg_type, station_id);
                desc.apply(o);
                desc.encode()
            }
            _ => return Ok(false),
        };
        frame(&payload, out)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoder;
    use gnss_relay_core::{AntennaInfo, GeodeticPosition};

    fn observation(msg_type: u16, station_id: u16) -> Vec<u8> {
        let mut payload = vec![0u8; 8];
        set_unsigned(&mut payload, 0, 12, u32::from(msg_type));
        set_unsigned(&mut payload, 12, 12, u32::from(station_id));
        payload[7] = 0x5A;
        let mut out = BytesMut::new();
        frame(&payload, &mut out).unwrap();
        out.to_vec()
    }

    fn decode_all(data: &[u8]) -> Vec<Message> {
        let mut decoder = Rtcm3Decoder::new(Rtcm3Framing);
        decoder.push(data);
        std::iter::from_fn(|| decoder.next_message()).collect()
    }

    #[test]
    fn test_frame_layout() {
        let data = observation(1004, 12);
        assert_eq!(data[0], PREAMBLE);
        assert_eq!(data[1], 0);
        assert_eq!(data[2], 8);
        assert_eq!(data.len(), 14);

        let messages = decode_all(&data);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_type, 1004);
        assert_eq!(&messages[0].frame[..], &data[..]);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut data = observation(1004, 12);
        data[1] |= 0x80;
        assert!(decode_all(&data).is_empty());
    }

    #[test]
    fn test_oversized_payload() {
        let mut out = BytesMut::new();
        assert!(frame(&[0u8; MAX_PAYLOAD_LEN + 1], &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_passthrough_without_overrides() {
        let data = observation(1077, 3);
        let msg = &decode_all(&data)[0];
        let mut encoder = Rtcm3Encoder::default();
        let mut out = BytesMut::new();
        assert!(encoder.encode(msg, &mut out).unwrap());
        assert_eq!(&out[..], &data[..]);
    }

    #[test]
    fn test_station_id_rewrite() {
        let msg = &decode_all(&observation(1004, 3))[0];
        let mut encoder = Rtcm3Encoder::new(StationOverrides {
            station_id: Some(2047),
            ..Default::default()
        });
        let mut out = BytesMut::new();
        assert!(encoder.encode(msg, &mut out).unwrap());

        let rewritten = &decode_all(&out)[0];
        assert_eq!(rewritten.msg_type, 1004);
        assert_eq!(crate::bits::get_unsigned(&rewritten.payload, 12, 12), 2047);
        assert_eq!(rewritten.payload[7], 0x5A);
    }

    #[test]
    fn test_foreign_format_not_representable() {
        let msg = Message {
            format: StreamFormat::Ubx,
            msg_type: 0x0215,
            frame: bytes::Bytes::from_static(&[0xB5, 0x62]),
            payload: bytes::Bytes::new(),
        };
        let mut out = BytesMut::new();
        assert!(!Rtcm3Encoder::default().encode(&msg, &mut out).unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn test_synthesized_station_messages() {
        let mut encoder = Rtcm3Encoder::new(StationOverrides {
            station_id: Some(100),
            position: Some(GeodeticPosition {
                latitude: 52.0,
                longitude: 4.0,
                height: 50.0,
            }),
            antenna: Some(AntennaInfo {
                descriptor: "LEIAR25.R4".to_string(),
                serial: "A1".to_string(),
                setup_id: 0,
            }),
            ..Default::default()
        });
        let mut out = BytesMut::new();
        assert!(encoder.station_message(1005, &mut out).unwrap());
        assert!(encoder.station_message(1008, &mut out).unwrap());
        assert!(!encoder.station_message(1004, &mut out).unwrap());

        let messages = decode_all(&out);
        assert_eq!(messages.iter().map(|m| m.msg_type).collect::<Vec<_>>(), vec![1005, 1008]);
        let arp = ReferencePoint::decode(&messages[0].payload).unwrap();
        assert_eq!(arp.station_id, 100);
        let back = station::ecef_to_geodetic(arp.ecef);
        assert!((back.latitude - 52.0).abs() < 1e-6);

        assert!(!Rtcm3Encoder::default().station_message(1005, &mut out).unwrap());
    }
}
