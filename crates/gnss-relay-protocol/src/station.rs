//! RTCM 3 station description messages.
//!
//! Field level codecs for the messages that describe the reference station
//! rather than observations:
//!
//! - 1005 / 1006: antenna reference point (ARP) in ECEF, 1006 with height
//! - 1007 / 1008: antenna descriptor, 1008 with serial number
//! - 1033: antenna and receiver descriptors
//!
//! plus the WGS84 conversions needed to apply [`StationOverrides`].

use gnss_relay_core::{GeodeticPosition, StationOverrides, StreamFormat};

use crate::bits::{get_signed_38, get_unsigned, set_signed_38, set_unsigned};
use crate::error::CodecError;

/// Longest descriptor string RTCM allows.
pub const MAX_DESCRIPTOR_LEN: usize = 31;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// ECEF resolution of 1005/1006 (m).
const ECEF_UNIT: f64 = 0.0001;

// ============================================================================
// Geodesy
// ============================================================================

/// Geodetic (degrees, metres) to ECEF (metres).
pub fn geodetic_to_ecef(pos: &GeodeticPosition) -> [f64; 3] {
    let lat = pos.latitude.to_radians();
    let lon = pos.longitude.to_radians();
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let (sin_lat, cos_lat) = lat.sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    [
        (n + pos.height) * cos_lat * lon.cos(),
        (n + pos.height) * cos_lat * lon.sin(),
        (n * (1.0 - e2) + pos.height) * sin_lat,
    ]
}

/// ECEF (metres) to geodetic (degrees, metres).
pub fn ecef_to_geodetic(r: [f64; 3]) -> GeodeticPosition {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let r2 = r[0] * r[0] + r[1] * r[1];
    let mut z = r[2];
    let mut zk = 0.0;
    let mut v = WGS84_A;
    while (z - zk).abs() >= 1e-4 {
        zk = z;
        let sin_lat = z / (r2 + z * z).sqrt();
        v = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        z = r[2] + v * e2 * sin_lat;
    }
    let (latitude, longitude) = if r2 > 1e-12 {
        ((z / r2.sqrt()).atan(), r[1].atan2(r[0]))
    } else if r[2] > 0.0 {
        (std::f64::consts::FRAC_PI_2, 0.0)
    } else {
        (-std::f64::consts::FRAC_PI_2, 0.0)
    };
    GeodeticPosition {
        latitude: latitude.to_degrees(),
        longitude: longitude.to_degrees(),
        height: (r2 + z * z).sqrt() - v,
    }
}

/// Rotate a local east/north/up vector at `origin` into ECEF.
pub fn enu_to_ecef(origin: &GeodeticPosition, enu: [f64; 3]) -> [f64; 3] {
    let (sin_lat, cos_lat) = origin.latitude.to_radians().sin_cos();
    let (sin_lon, cos_lon) = origin.longitude.to_radians().sin_cos();
    let [e, n, u] = enu;
    [
        -sin_lon * e - sin_lat * cos_lon * n + cos_lat * cos_lon * u,
        cos_lon * e - sin_lat * sin_lon * n + cos_lat * sin_lon * u,
        cos_lat * n + sin_lat * u,
    ]
}

// ============================================================================
// 1005 / 1006
// ============================================================================

/// Antenna reference point message (1005, or 1006 with `antenna_height`).
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePoint {
    pub station_id: u16,
    pub itrf_year: u8,
    pub gps: bool,
    pub glonass: bool,
    pub galileo: bool,
    pub reference_station: bool,
    /// ARP in ECEF metres.
    pub ecef: [f64; 3],
    pub single_oscillator: bool,
    pub quarter_cycle: u8,
    /// Antenna height above the marker (m), 1006 only.
    pub antenna_height: Option<f64>,
}

impl ReferencePoint {
    /// A fresh description for a synthesized message.
    pub fn new(station_id: u16, ecef: [f64; 3]) -> Self {
        Self {
            station_id,
            itrf_year: 0,
            gps: true,
            glonass: true,
            galileo: true,
            reference_station: false,
            ecef,
            single_oscillator: false,
            quarter_cycle: 0,
            antenna_height: None,
        }
    }

    pub fn msg_type(&self) -> u16 {
        if self.antenna_height.is_some() {
            1006
        } else {
            1005
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let msg_type = message_type(payload);
        let need = if msg_type == 1006 { 21 } else { 19 };
        if payload.len() < need {
            return Err(malformed(msg_type, "reference point too short"));
        }
        let ecef_at = |pos| get_signed_38(payload, pos) as f64 * ECEF_UNIT;
        Ok(Self {
            station_id: get_unsigned(payload, 12, 12) as u16,
            itrf_year: get_unsigned(payload, 24, 6) as u8,
            gps: get_unsigned(payload, 30, 1) == 1,
            glonass: get_unsigned(payload, 31, 1) == 1,
            galileo: get_unsigned(payload, 32, 1) == 1,
            reference_station: get_unsigned(payload, 33, 1) == 1,
            ecef: [ecef_at(34), ecef_at(74), ecef_at(114)],
            single_oscillator: get_unsigned(payload, 72, 1) == 1,
            quarter_cycle: get_unsigned(payload, 112, 2) as u8,
            antenna_height: (msg_type == 1006)
                .then(|| f64::from(get_unsigned(payload, 152, 16)) * ECEF_UNIT),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let msg_type = self.msg_type();
        let mut buf = vec![0u8; if msg_type == 1006 { 21 } else { 19 }];
        set_unsigned(&mut buf, 0, 12, u32::from(msg_type));
        set_unsigned(&mut buf, 12, 12, u32::from(self.station_id));
        set_unsigned(&mut buf, 24, 6, u32::from(self.itrf_year));
        set_unsigned(&mut buf, 30, 1, u32::from(self.gps));
        set_unsigned(&mut buf, 31, 1, u32::from(self.glonass));
        set_unsigned(&mut buf, 32, 1, u32::from(self.galileo));
        set_unsigned(&mut buf, 33, 1, u32::from(self.reference_station));
        for (axis, pos) in [34usize, 74, 114].into_iter().enumerate() {
            let value = (self.ecef[axis] / ECEF_UNIT).round();
            if value.abs() >= (1i64 << 37) as f64 {
                return Err(CodecError::FieldOverflow {
                    msg_type,
                    field: "antenna reference point",
                });
            }
            set_signed_38(&mut buf, pos, value as i64);
        }
        set_unsigned(&mut buf, 72, 1, u32::from(self.single_oscillator));
        set_unsigned(&mut buf, 112, 2, u32::from(self.quarter_cycle));
        if let Some(height) = self.antenna_height {
            let value = (height / ECEF_UNIT).round();
            if !(0.0..=f64::from(u16::MAX)).contains(&value) {
                return Err(CodecError::FieldOverflow {
                    msg_type,
                    field: "antenna height",
                });
            }
            set_unsigned(&mut buf, 152, 16, value as u32);
        }
        Ok(buf)
    }

    /// Apply configured overrides.
    ///
    /// A configured position replaces the native ARP. The east and north
    /// components of the antenna offset shift the ARP; the up component
    /// becomes the 1006 antenna height.
    pub fn apply(&mut self, overrides: &StationOverrides) {
        if let Some(id) = overrides.station_id {
            self.station_id = id;
        }
        if let Some(pos) = &overrides.position {
            self.ecef = geodetic_to_ecef(pos);
        }
        if let Some(offset) = &overrides.antenna_offset {
            let origin = ecef_to_geodetic(self.ecef);
            let shift = enu_to_ecef(&origin, [offset.east, offset.north, 0.0]);
            for (axis, delta) in shift.iter().enumerate() {
                self.ecef[axis] += delta;
            }
            if self.antenna_height.is_some() {
                self.antenna_height = Some(offset.up);
            }
        }
    }
}

// ============================================================================
// 1007 / 1008 / 1033
// ============================================================================

/// Antenna and receiver descriptors (1007, 1008 or 1033).
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptors {
    pub msg_type: u16,
    pub station_id: u16,
    pub antenna: String,
    pub setup_id: u8,
    pub antenna_serial: String,
    pub receiver: String,
    pub firmware: String,
    pub receiver_serial: String,
}

impl Descriptors {
    /// An empty description of the given type.
    pub fn new(msg_type: u16, station_id: u16) -> Self {
        Self {
            msg_type,
            station_id,
            antenna: String::new(),
            setup_id: 0,
            antenna_serial: String::new(),
            receiver: String::new(),
            firmware: String::new(),
            receiver_serial: String::new(),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let msg_type = message_type(payload);
        let mut reader = FieldReader {
            payload,
            pos: 12,
            msg_type,
        };
        let mut out = Self::new(msg_type, reader.unsigned(12)? as u16);
        out.antenna = reader.string()?;
        out.setup_id = reader.unsigned(8)? as u8;
        if msg_type == 1008 || msg_type == 1033 {
            out.antenna_serial = reader.string()?;
        }
        if msg_type == 1033 {
            out.receiver = reader.string()?;
            out.firmware = reader.string()?;
            out.receiver_serial = reader.string()?;
        }
        Ok(out)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut fields: Vec<&str> = vec![&self.antenna];
        if self.msg_type == 1008 || self.msg_type == 1033 {
            fields.push(&self.antenna_serial);
        }
        if self.msg_type == 1033 {
            fields.extend([
                self.receiver.as_str(),
                self.firmware.as_str(),
                self.receiver_serial.as_str(),
            ]);
        }
        let chars: usize = fields.iter().map(|f| f.len().min(MAX_DESCRIPTOR_LEN)).sum();
        let bits = 24 + 8 + fields.len() * 8 + chars * 8;
        let mut buf = vec![0u8; bits.div_ceil(8)];

        set_unsigned(&mut buf, 0, 12, u32::from(self.msg_type));
        set_unsigned(&mut buf, 12, 12, u32::from(self.station_id));
        let mut pos = 24;
        for (i, field) in fields.iter().enumerate() {
            pos = put_string(&mut buf, pos, field);
            if i == 0 {
                set_unsigned(&mut buf, pos, 8, u32::from(self.setup_id));
                pos += 8;
            }
        }
        buf
    }

    /// Replace native descriptors with the configured ones.
    pub fn apply(&mut self, overrides: &StationOverrides) {
        if let Some(id) = overrides.station_id {
            self.station_id = id;
        }
        if let Some(antenna) = &overrides.antenna {
            self.antenna = antenna.descriptor.clone();
            self.antenna_serial = antenna.serial.clone();
            self.setup_id = antenna.setup_id;
        }
        if let Some(receiver) = &overrides.receiver {
            self.receiver = receiver.descriptor.clone();
            self.firmware = receiver.firmware.clone();
            self.receiver_serial = receiver.serial.clone();
        }
    }
}

struct FieldReader<'a> {
    payload: &'a [u8],
    pos: usize,
    msg_type: u16,
}

impl FieldReader<'_> {
    fn unsigned(&mut self, len: usize) -> Result<u32, CodecError> {
        if self.pos + len > self.payload.len() * 8 {
            return Err(malformed(self.msg_type, "descriptor truncated"));
        }
        let value = get_unsigned(self.payload, self.pos, len);
        self.pos += len;
        Ok(value)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.unsigned(8)? as usize;
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            bytes.push(self.unsigned(8)? as u8);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn put_string(buf: &mut [u8], mut pos: usize, value: &str) -> usize {
    let bytes = &value.as_bytes()[..value.len().min(MAX_DESCRIPTOR_LEN)];
    set_unsigned(buf, pos, 8, bytes.len() as u32);
    pos += 8;
    for &b in bytes {
        set_unsigned(buf, pos, 8, u32::from(b));
        pos += 8;
    }
    pos
}

/// Message number in the first 12 bits of an RTCM 3 payload.
pub fn message_type(payload: &[u8]) -> u16 {
    if payload.len() < 2 {
        return 0;
    }
    get_unsigned(payload, 0, 12) as u16
}

fn malformed(msg_type: u16, reason: &str) -> CodecError {
    CodecError::Malformed {
        format: StreamFormat::Rtcm3,
        msg_type,
        reason: reason.to_string(),
    }
}
