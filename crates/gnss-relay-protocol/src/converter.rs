//! Per-output format converter.
//!
//! A [`Converter`] decodes the input stream, drops message types the filter
//! does not allow or that arrive before their minimum interval, and encodes
//! the rest for the output. Decode problems never surface as errors: the
//! decoder resynchronizes and the event is counted.

use std::fmt;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use gnss_relay_core::{FilterGate, MessageFilter, StationOverrides, StreamFormat};
use tracing::{debug, trace};

use crate::codec::{DecodeStats, Decoder, Encoder};
use crate::error::CodecError;
use crate::message::Message;
use crate::registry::CodecRegistry;

/// Station description types a converter may synthesize.
const STATION_TYPES: [u16; 5] = [1005, 1006, 1007, 1008, 1033];

/// Conversion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub decode: DecodeStats,
    /// Messages written to the output.
    pub emitted: u64,
    /// Messages dropped by the filter or its rate limit.
    pub filtered: u64,
    /// Messages the output protocol cannot carry.
    pub unrepresentable: u64,
    /// Messages that failed to encode.
    pub encode_errors: u64,
}

pub struct Converter {
    decoder: Box<dyn Decoder>,
    encoder: Box<dyn Encoder>,
    gate: FilterGate,
    synthesized: Vec<u16>,
    status: String,
    stats: ConvertStats,
}

impl Converter {
    /// Converter using the built-in codecs.
    pub fn new(
        input: StreamFormat,
        output: StreamFormat,
        filter: &MessageFilter,
        overrides: &StationOverrides,
        receiver_options: &str,
    ) -> Result<Self, CodecError> {
        Self::from_registry(
            &CodecRegistry::default(),
            input,
            output,
            filter,
            overrides,
            receiver_options,
        )
    }

    pub fn from_registry(
        registry: &CodecRegistry,
        input: StreamFormat,
        output: StreamFormat,
        filter: &MessageFilter,
        overrides: &StationOverrides,
        receiver_options: &str,
    ) -> Result<Self, CodecError> {
        let decoder = registry.decoder(input, receiver_options)?;
        let mut encoder = registry.encoder(output, overrides)?;

        // Inputs of another protocol carry no station messages that could be
        // rewritten, so configured station data is emitted on its own.
        let mut synthesized = Vec::new();
        if input != output {
            let mut scratch = BytesMut::new();
            for entry in filter.entries() {
                if STATION_TYPES.contains(&entry.msg_type)
                    && encoder.station_message(entry.msg_type, &mut scratch)?
                {
                    synthesized.push(entry.msg_type);
                }
            }
        }

        debug!(
            "Converter {} -> {} filter [{}] synthesized {:?}",
            input, output, filter, synthesized
        );
        Ok(Self {
            decoder,
            encoder,
            gate: filter.gate(),
            synthesized,
            status: String::new(),
            stats: ConvertStats::default(),
        })
    }

    pub fn input_format(&self) -> StreamFormat {
        self.decoder.format()
    }

    pub fn output_format(&self) -> StreamFormat {
        self.encoder.format()
    }

    /// Convert a chunk of input observed now.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.feed_at(data, Instant::now())
    }

    /// Convert a chunk of input observed at `now`.
    ///
    /// Returns one encoded chunk per emitted message, in input order.
    pub fn feed_at(&mut self, data: &[u8], now: Instant) -> Vec<Bytes> {
        self.decoder.push(data);
        let mut chunks = Vec::new();
        while let Some(msg) = self.decoder.next_message() {
            if self.gate.admit(msg.msg_type, now) {
                if let Some(chunk) = self.encode(&msg) {
                    chunks.push(chunk);
                }
            } else {
                self.stats.filtered += 1;
            }
            for i in 0..self.synthesized.len() {
                let msg_type = self.synthesized[i];
                if self.gate.admit(msg_type, now) {
                    if let Some(chunk) = self.synthesize(msg_type) {
                        chunks.push(chunk);
                    }
                }
            }
        }
        chunks
    }

    fn encode(&mut self, msg: &Message) -> Option<Bytes> {
        let mut out = BytesMut::new();
        match self.encoder.encode(msg, &mut out) {
            Ok(true) => Some(self.emitted(msg.msg_type, out)),
            Ok(false) => {
                self.stats.unrepresentable += 1;
                None
            }
            Err(e) => {
                self.stats.encode_errors += 1;
                debug!("Failed to encode {} {}: {}", msg.format, msg.msg_type, e);
                None
            }
        }
    }

    fn synthesize(&mut self, msg_type: u16) -> Option<Bytes> {
        let mut out = BytesMut::new();
        match self.encoder.station_message(msg_type, &mut out) {
            Ok(true) => Some(self.emitted(msg_type, out)),
            Ok(false) => None,
            Err(e) => {
                self.stats.encode_errors += 1;
                debug!("Failed to build station message {}: {}", msg_type, e);
                None
            }
        }
    }

    fn emitted(&mut self, msg_type: u16, out: BytesMut) -> Bytes {
        self.stats.emitted += 1;
        self.status = format!("{} {} ({} B)", self.encoder.format(), msg_type, out.len());
        trace!("Converted {}", self.status);
        out.freeze()
    }

    /// Latest converted message, for the status line.
    pub fn status_message(&self) -> &str {
        &self.status
    }

    pub fn stats(&self) -> ConvertStats {
        ConvertStats {
            decode: self.decoder.stats(),
            ..self.stats
        }
    }

    /// Forget the rate limit history, e.g. after the output reconnected.
    pub fn reset(&mut self) {
        self.gate.reset();
    }

    /// Consume the converter, returning any output the encoder still held.
    pub fn finish(mut self) -> Option<Bytes> {
        let mut out = BytesMut::new();
        self.encoder.flush(&mut out);
        (!out.is_empty()).then(|| out.freeze())
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("input", &self.decoder.format())
            .field("output", &self.encoder.format())
            .field("synthesized", &self.synthesized)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::{get_unsigned, set_unsigned};
    use crate::rtcm3::{frame, Rtcm3Decoder, Rtcm3Framing};
    use crate::station::ReferencePoint;
    use crate::ubx;
    use gnss_relay_core::GeodeticPosition;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn rtcm(msg_type: u16, station_id: u16) -> Vec<u8> {
        let mut payload = vec![0u8; 10];
        set_unsigned(&mut payload, 0, 12, u32::from(msg_type));
        set_unsigned(&mut payload, 12, 12, u32::from(station_id));
        let mut out = BytesMut::new();
        frame(&payload, &mut out).unwrap();
        out.to_vec()
    }

    fn types(chunks: &[Bytes]) -> Vec<u16> {
        let mut decoder = Rtcm3Decoder::new(Rtcm3Framing);
        for chunk in chunks {
            decoder.push(chunk);
        }
        std::iter::from_fn(|| decoder.next_message())
            .map(|m| m.msg_type)
            .collect()
    }

    fn converter(filter: &str, overrides: StationOverrides) -> Converter {
        Converter::new(
            StreamFormat::Rtcm3,
            StreamFormat::Rtcm3,
            &MessageFilter::parse(filter).unwrap(),
            &overrides,
            "",
        )
        .unwrap()
    }

    #[test]
    fn test_filter_interval_and_suppression() {
        let mut conv = converter("1004(1)", StationOverrides::default());
        let t0 = Instant::now();
        let mut emitted = Vec::new();
        for (ms, msg_type) in [(0, 1004), (100, 1019), (500, 1004), (700, 1019), (1200, 1004)] {
            let out = conv.feed_at(&rtcm(msg_type, 1), t0 + Duration::from_millis(ms));
            if !out.is_empty() {
                emitted.push((ms, types(&out)));
            }
        }
        assert_eq!(emitted, vec![(0, vec![1004]), (1200, vec![1004])]);
        assert_eq!(conv.stats().filtered, 3);
        assert_eq!(conv.stats().emitted, 2);
    }

    #[test]
    fn test_resync_over_garbage() {
        let mut conv = converter("1004", StationOverrides::default());
        let garbage: Vec<u8> = (0..50u8).map(|i| i.wrapping_mul(37).wrapping_add(11) & 0x7F).collect();
        assert!(!garbage.contains(&0xD3));

        let mut data = rtcm(1004, 1);
        data.extend_from_slice(&garbage);
        data.extend_from_slice(&rtcm(1004, 2));

        let out = conv.feed(&data);
        assert_eq!(types(&out), vec![1004, 1004]);
        assert_eq!(conv.stats().decode.messages, 2);
        assert_eq!(conv.stats().decode.skipped_bytes, 50);
    }

    #[test]
    fn test_resync_over_random_garbage_with_preamble() {
        let mut conv = converter("1004", StationOverrides::default());
        let mut seed = 0x1234_5678u32;
        let mut garbage: Vec<u8> = (0..50)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                (seed >> 24) as u8
            })
            .collect();
        // A preamble whose length runs into the frames that follow.
        garbage[40..43].copy_from_slice(&[0xD3, 0x00, 0x20]);

        let mut data = rtcm(1004, 1);
        data.extend_from_slice(&garbage);
        data.extend_from_slice(&rtcm(1004, 2));
        data.extend_from_slice(&rtcm(1004, 3));
        data.extend_from_slice(&[0u8; 1100]);

        let out = conv.feed(&data);
        let stations: Vec<u32> = out.iter().map(|m| get_unsigned(&m[3..], 12, 12)).collect();
        assert_eq!(types(&out), vec![1004, 1004, 1004]);
        assert_eq!(stations, vec![1, 2, 3]);
        assert!(conv.stats().decode.checksum_errors >= 1);
    }

    #[test]
    fn test_chunked_input_matches_whole() {
        let data = [rtcm(1004, 1), rtcm(1019, 1), rtcm(1004, 1)].concat();
        let mut whole = converter("1004,1019", StationOverrides::default());
        let expected: Vec<u8> = whole.feed(&data).concat();

        let mut chunked = converter("1004,1019", StationOverrides::default());
        let mut actual = Vec::new();
        for b in &data {
            for chunk in chunked.feed(std::slice::from_ref(b)) {
                actual.extend_from_slice(&chunk);
            }
        }
        assert_eq!(actual, expected);
        assert_eq!(actual, data);
    }

    #[test]
    fn test_overrides_applied_and_status() {
        let mut conv = converter(
            "1004",
            StationOverrides {
                station_id: Some(321),
                ..Default::default()
            },
        );
        let out = conv.feed(&rtcm(1004, 1));
        assert_eq!(out.len(), 1);
        assert_eq!(get_unsigned(&out[0][3..], 12, 12), 321);
        assert_eq!(conv.status_message(), format!("rtcm3 1004 ({} B)", out[0].len()));
    }

    #[test]
    fn test_ubx_input_synthesizes_station_message() {
        let overrides = StationOverrides {
            position: Some(GeodeticPosition {
                latitude: -33.9,
                longitude: 151.2,
                height: 30.0,
            }),
            ..Default::default()
        };
        let mut conv = Converter::new(
            StreamFormat::Ubx,
            StreamFormat::Rtcm3,
            &MessageFilter::parse("1004,1005(10),1033").unwrap(),
            &overrides,
            "",
        )
        .unwrap();

        let t0 = Instant::now();
        let rawx = ubx::frame(0x02, 0x15, &[0; 16]);
        let first = conv.feed_at(&rawx, t0);
        let second = conv.feed_at(&rawx, t0 + Duration::from_secs(1));
        assert_eq!(types(&first), vec![1005]);
        assert!(second.is_empty());
        assert_eq!(conv.stats().unrepresentable, 0);
        assert_eq!(conv.stats().filtered, 2);

        let mut decoder = Rtcm3Decoder::new(Rtcm3Framing);
        decoder.push(&first[0]);
        let arp = ReferencePoint::decode(&decoder.next_message().unwrap().payload).unwrap();
        assert_eq!(arp.station_id, 0);
    }

    #[test]
    fn test_missing_codec_is_an_error() {
        let filter = MessageFilter::default();
        let overrides = StationOverrides::default();
        assert!(matches!(
            Converter::new(StreamFormat::Rtcm2, StreamFormat::Rtcm3, &filter, &overrides, ""),
            Err(CodecError::NoDecoder(StreamFormat::Rtcm2))
        ));
        let conv = converter("1004", StationOverrides::default());
        assert!(conv.finish().is_none());
    }
}
