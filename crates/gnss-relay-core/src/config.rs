//! Relay configuration.
//!
//! [`RelayConfig`] is the serialized configuration surface (JSON, camelCase,
//! every field defaulted). [`RelayConfig::compile`] validates it and produces
//! a [`RelayPlan`] holding parsed endpoints, the message filter, the command
//! script, station overrides and the timing options. Any problem found here is
//! a startup error; nothing has been opened yet.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::CommandScript;
use crate::endpoint::Endpoint;
use crate::error::ConfigError;
use crate::filter::{MessageFilter, DEFAULT_MESSAGES};

/// Maximum number of output streams.
pub const MAX_OUTPUTS: usize = 16;

/// Largest station id representable in RTCM 3 (12 bits).
pub const MAX_STATION_ID: u16 = 4095;

// ============================================================================
// Serialized configuration
// ============================================================================

/// Relay configuration as read from a file or assembled by a front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    /// Input stream path.
    pub input: String,

    /// Output stream paths.
    pub outputs: Vec<String>,

    /// Message types and intervals for converting outputs.
    pub messages: String,

    /// Station id written into converted messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<u16>,

    /// Receiver dependent decoder options.
    pub receiver_options: String,

    /// Inactivity / write timeout (ms).
    pub timeout_ms: u64,

    /// Reconnect interval (ms).
    pub reconnect_ms: u64,

    /// NMEA GGA request cycle (minutes), 0 to disable.
    pub nmea_cycle_min: u32,

    /// File swap margin (s).
    pub swap_margin_secs: u64,

    /// Input read buffer size (bytes).
    pub buffer_size: usize,

    /// Relay loop period (ms).
    pub cycle_ms: u64,

    /// Receiver command script text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<String>,

    /// Station position: latitude (deg), longitude (deg), height (m).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_position: Option<[f64; 3]>,

    /// Antenna info: `descriptor,serial,setup_id`.
    pub antenna_info: String,

    /// Receiver info: `type,firmware,serial`.
    pub receiver_info: String,

    /// Antenna offset east, north, up (m).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antenna_offset: Option<[f64; 3]>,

    /// Working directory for relative file paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<String>,

    /// HTTP/NTRIP proxy `host:port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Diagnostic trace level.
    pub trace_level: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            outputs: Vec::new(),
            messages: DEFAULT_MESSAGES.to_string(),
            station_id: None,
            receiver_options: String::new(),
            timeout_ms: 10_000,
            reconnect_ms: 10_000,
            nmea_cycle_min: 0,
            swap_margin_secs: 30,
            buffer_size: 32_768,
            cycle_ms: 10,
            commands: None,
            station_position: None,
            antenna_info: String::new(),
            receiver_info: String::new(),
            antenna_offset: None,
            local_dir: None,
            proxy: None,
            trace_level: 0,
        }
    }
}

impl RelayConfig {
    /// Parse a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Validate the configuration and resolve it into a plan.
    pub fn compile(&self) -> Result<RelayPlan, ConfigError> {
        let input = parse_endpoint(&self.input)?;
        input.validate_input().map_err(|source| ConfigError::Endpoint {
            path: self.input.clone(),
            source,
        })?;

        if self.outputs.is_empty() {
            return Err(ConfigError::NoOutputs);
        }
        if self.outputs.len() > MAX_OUTPUTS {
            return Err(ConfigError::TooManyOutputs {
                count: self.outputs.len(),
                max: MAX_OUTPUTS,
            });
        }

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for path in &self.outputs {
            let output = parse_endpoint(path)?;
            output.validate_output().map_err(|source| ConfigError::Endpoint {
                path: path.clone(),
                source,
            })?;
            if output.format.is_some() && input.format.is_none() {
                return Err(ConfigError::MissingInputFormat(path.clone()));
            }
            outputs.push(output);
        }

        if self.buffer_size == 0 {
            return Err(invalid_option("bufferSize", "must be positive"));
        }
        if self.cycle_ms == 0 {
            return Err(invalid_option("cycleMs", "must be positive"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid_option("timeoutMs", "must be positive"));
        }

        Ok(RelayPlan {
            input,
            outputs,
            filter: MessageFilter::parse(&self.messages)?,
            commands: self
                .commands
                .as_deref()
                .map(CommandScript::parse)
                .unwrap_or_default(),
            station: self.station_overrides()?,
            options: RelayOptions {
                timeout: Duration::from_millis(self.timeout_ms),
                reconnect_interval: Duration::from_millis(self.reconnect_ms),
                nmea_cycle: Duration::from_secs(u64::from(self.nmea_cycle_min) * 60),
                swap_margin: Duration::from_secs(self.swap_margin_secs),
                buffer_size: self.buffer_size,
                cycle: Duration::from_millis(self.cycle_ms),
                local_dir: self.local_dir.as_ref().map(PathBuf::from),
                proxy: self.proxy.clone().filter(|p| !p.is_empty()),
                receiver_options: self.receiver_options.clone(),
            },
            trace_level: self.trace_level,
        })
    }

    fn station_overrides(&self) -> Result<StationOverrides, ConfigError> {
        if let Some(id) = self.station_id {
            if id > MAX_STATION_ID {
                return Err(invalid_option(
                    "stationId",
                    format!("{} exceeds {}", id, MAX_STATION_ID),
                ));
            }
        }

        let position = match self.station_position {
            Some([lat, lon, height]) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=360.0).contains(&lon) {
                    return Err(invalid_option(
                        "stationPosition",
                        format!("latitude/longitude out of range: {}, {}", lat, lon),
                    ));
                }
                Some(GeodeticPosition {
                    latitude: lat,
                    longitude: if lon > 180.0 { lon - 360.0 } else { lon },
                    height,
                })
            }
            None => None,
        };

        let antenna = if self.antenna_info.trim().is_empty() {
            None
        } else {
            let fields = split_fields(&self.antenna_info);
            let setup_id = match fields[2].as_str() {
                "" => 0,
                v => v
                    .parse::<u8>()
                    .map_err(|_| invalid_option("antennaInfo", format!("invalid setup id '{}'", v)))?,
            };
            Some(AntennaInfo {
                descriptor: fields[0].clone(),
                serial: fields[1].clone(),
                setup_id,
            })
        };

        let receiver = if self.receiver_info.trim().is_empty() {
            None
        } else {
            let fields = split_fields(&self.receiver_info);
            Some(ReceiverInfo {
                descriptor: fields[0].clone(),
                firmware: fields[1].clone(),
                serial: fields[2].clone(),
            })
        };

        Ok(StationOverrides {
            station_id: self.station_id,
            position,
            antenna_offset: self.antenna_offset.map(|[east, north, up]| EnuOffset { east, north, up }),
            antenna,
            receiver,
        })
    }
}

fn parse_endpoint(path: &str) -> Result<Endpoint, ConfigError> {
    Endpoint::parse(path).map_err(|source| ConfigError::Endpoint {
        path: path.to_string(),
        source,
    })
}

fn invalid_option(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidOption {
        name,
        reason: reason.into(),
    }
}

/// Split a comma separated info string into exactly three trimmed fields.
fn split_fields(info: &str) -> [String; 3] {
    let mut fields: [String; 3] = Default::default();
    for (slot, value) in fields.iter_mut().zip(info.splitn(3, ',')) {
        *slot = value.trim().to_string();
    }
    fields
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Timing and environment options of a running relay.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOptions {
    /// Open/write bound and inactivity timeout. Zero disables both.
    pub timeout: Duration,
    pub reconnect_interval: Duration,
    /// Zero disables NMEA requests.
    pub nmea_cycle: Duration,
    pub swap_margin: Duration,
    pub buffer_size: usize,
    pub cycle: Duration,
    pub local_dir: Option<PathBuf>,
    pub proxy: Option<String>,
    pub receiver_options: String,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(10),
            nmea_cycle: Duration::ZERO,
            swap_margin: Duration::from_secs(30),
            buffer_size: 32_768,
            cycle: Duration::from_millis(10),
            local_dir: None,
            proxy: None,
            receiver_options: String::new(),
        }
    }
}

/// Geodetic station position (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodeticPosition {
    /// Degrees, north positive.
    pub latitude: f64,
    /// Degrees, east positive.
    pub longitude: f64,
    /// Ellipsoidal height in metres.
    pub height: f64,
}

/// Antenna offset from the marker, local east/north/up metres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnuOffset {
    pub east: f64,
    pub north: f64,
    pub up: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AntennaInfo {
    pub descriptor: String,
    pub serial: String,
    pub setup_id: u8,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReceiverInfo {
    pub descriptor: String,
    pub firmware: String,
    pub serial: String,
}

/// Station metadata that replaces the native fields of converted messages.
///
/// A configured value always wins over the value carried by the input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StationOverrides {
    pub station_id: Option<u16>,
    pub position: Option<GeodeticPosition>,
    pub antenna_offset: Option<EnuOffset>,
    pub antenna: Option<AntennaInfo>,
    pub receiver: Option<ReceiverInfo>,
}

impl StationOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A validated relay configuration.
#[derive(Debug, Clone)]
pub struct RelayPlan {
    pub input: Endpoint,
    pub outputs: Vec<Endpoint>,
    pub filter: MessageFilter,
    pub commands: CommandScript,
    pub station: StationOverrides,
    pub options: RelayOptions,
    pub trace_level: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::StreamKind;
    use pretty_assertions::assert_eq;

    fn config(input: &str, outputs: &[&str]) -> RelayConfig {
        RelayConfig {
            input: input.to_string(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_from_json() {
        let cfg = RelayConfig::from_json(
            r#"{"input":"ntrip://caster/MP#rtcm3","outputs":["tcpsvr://:6661"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.timeout_ms, 10_000);
        assert_eq!(cfg.reconnect_ms, 10_000);
        assert_eq!(cfg.swap_margin_secs, 30);
        assert_eq!(cfg.nmea_cycle_min, 0);
        assert_eq!(cfg.messages, "1004,1019");

        let plan = cfg.compile().unwrap();
        assert_eq!(plan.input.kind(), StreamKind::NtripClient);
        assert_eq!(plan.outputs.len(), 1);
        assert_eq!(plan.options.reconnect_interval, Duration::from_secs(10));
        assert_eq!(plan.options.swap_margin, Duration::from_secs(30));
        assert!(plan.station.is_empty());
        assert!(plan.commands.is_empty());
    }

    #[test]
    fn test_camel_case_fields() {
        let cfg = RelayConfig::from_json(
            r#"{
                "input": "serial://ttyUSB0:115200#ubx",
                "outputs": ["file://out.ubx"],
                "reconnectMs": 2500,
                "nmeaCycleMin": 1,
                "stationPosition": [35.0, 139.0, 40.0],
                "antennaInfo": "TRM59800.00 NONE,12345,1",
                "receiverInfo": "TRIMBLE NETR9,5.45,5012",
                "antennaOffset": [0.0, 0.0, 1.5],
                "stationId": 42
            }"#,
        )
        .unwrap();
        let plan = cfg.compile().unwrap();
        assert_eq!(plan.options.reconnect_interval, Duration::from_millis(2500));
        assert_eq!(plan.options.nmea_cycle, Duration::from_secs(60));
        assert_eq!(plan.station.station_id, Some(42));
        assert_eq!(
            plan.station.antenna,
            Some(AntennaInfo {
                descriptor: "TRM59800.00 NONE".to_string(),
                serial: "12345".to_string(),
                setup_id: 1,
            })
        );
        assert_eq!(
            plan.station.receiver.as_ref().map(|r| r.firmware.as_str()),
            Some("5.45")
        );
        assert_eq!(plan.station.antenna_offset.map(|o| o.up), Some(1.5));
    }

    #[test]
    fn test_output_count_is_checked() {
        assert!(matches!(
            config("in.log", &[]).compile(),
            Err(ConfigError::NoOutputs)
        ));

        let many: Vec<String> = (0..=MAX_OUTPUTS).map(|i| format!("out{}.log", i)).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        assert!(matches!(
            config("in.log", &refs).compile(),
            Err(ConfigError::TooManyOutputs { count, max }) if count == MAX_OUTPUTS + 1 && max == MAX_OUTPUTS
        ));
    }

    #[test]
    fn test_role_and_format_errors() {
        assert!(matches!(
            config("ntrips://:p@caster/M", &["out.log"]).compile(),
            Err(ConfigError::Endpoint { .. })
        ));
        assert!(matches!(
            config("in.log#rtcm3", &["tcpsvr://:2101#rtcm2"]).compile(),
            Err(ConfigError::Endpoint { .. })
        ));
        assert!(matches!(
            config("in.log", &["tcpsvr://:2101#rtcm3"]).compile(),
            Err(ConfigError::MissingInputFormat(_))
        ));
        assert!(matches!(
            config("bogus://x", &["out.log"]).compile(),
            Err(ConfigError::Endpoint { .. })
        ));
    }

    #[test]
    fn test_invalid_options() {
        let mut cfg = config("in.log", &["out.log"]);
        cfg.station_id = Some(5000);
        assert!(matches!(cfg.compile(), Err(ConfigError::InvalidOption { name: "stationId", .. })));

        let mut cfg = config("in.log", &["out.log"]);
        cfg.station_position = Some([91.0, 0.0, 0.0]);
        assert!(cfg.compile().is_err());

        let mut cfg = config("in.log", &["out.log"]);
        cfg.messages = "1004(x)".to_string();
        assert!(matches!(cfg.compile(), Err(ConfigError::InvalidFilter(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut cfg = config("serial://ttyUSB0:115200", &["out.log"]);
        cfg.timeout_ms = 0;
        assert!(matches!(cfg.compile(), Err(ConfigError::InvalidOption { name: "timeoutMs", .. })));

        cfg.timeout_ms = 1;
        assert_eq!(cfg.compile().unwrap().options.timeout, Duration::from_millis(1));
    }

    #[test]
    fn test_longitude_normalized() {
        let mut cfg = config("in.log", &["out.log"]);
        cfg.station_position = Some([35.0, 220.0, 10.0]);
        let position = cfg.compile().unwrap().station.position.unwrap();
        assert_eq!(position.longitude, -140.0);

        cfg.station_position = Some([35.0, 180.0, 10.0]);
        assert_eq!(cfg.compile().unwrap().station.position.unwrap().longitude, 180.0);
    }
}
