//! Protocol format tags.
//!
//! A stream path may carry a `#format` suffix naming the wire protocol carried
//! on the stream. The tag selects the decoder (input) or encoder (output) used
//! when an output converts the input stream instead of relaying it raw.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// Wire protocol carried on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// RTCM 2.x
    Rtcm2,
    /// RTCM 3.x
    Rtcm3,
    /// NovAtel OEMV/4/6, OEMStar
    Nov,
    /// NovAtel OEM3
    Oem3,
    /// u-blox LEA-4T/5T/6T
    Ubx,
    /// NovAtel Superstar II
    Ss2,
    /// Hemisphere Eclipse/Crescent
    Hemis,
    /// SkyTraq S1315F
    Stq,
    /// Furuno GW10
    Gw10,
    /// Javad
    Javad,
    /// NVS BINR
    Nvs,
    /// BINEX
    Binex,
    /// Trimble RT17
    Rt17,
}

impl StreamFormat {
    /// Every known format, in tag order.
    pub const ALL: [StreamFormat; 13] = [
        StreamFormat::Rtcm2,
        StreamFormat::Rtcm3,
        StreamFormat::Nov,
        StreamFormat::Oem3,
        StreamFormat::Ubx,
        StreamFormat::Ss2,
        StreamFormat::Hemis,
        StreamFormat::Stq,
        StreamFormat::Gw10,
        StreamFormat::Javad,
        StreamFormat::Nvs,
        StreamFormat::Binex,
        StreamFormat::Rt17,
    ];

    /// The tag used in stream paths (without the leading `#`).
    pub fn tag(&self) -> &'static str {
        match self {
            StreamFormat::Rtcm2 => "rtcm2",
            StreamFormat::Rtcm3 => "rtcm3",
            StreamFormat::Nov => "nov",
            StreamFormat::Oem3 => "oem3",
            StreamFormat::Ubx => "ubx",
            StreamFormat::Ss2 => "ss2",
            StreamFormat::Hemis => "hemis",
            StreamFormat::Stq => "stq",
            StreamFormat::Gw10 => "gw10",
            StreamFormat::Javad => "javad",
            StreamFormat::Nvs => "nvs",
            StreamFormat::Binex => "binex",
            StreamFormat::Rt17 => "rt17",
        }
    }

    /// Human readable receiver/standard name.
    pub fn description(&self) -> &'static str {
        match self {
            StreamFormat::Rtcm2 => "RTCM 2",
            StreamFormat::Rtcm3 => "RTCM 3",
            StreamFormat::Nov => "NovAtel OEMV/4/6,OEMStar",
            StreamFormat::Oem3 => "NovAtel OEM3",
            StreamFormat::Ubx => "ublox LEA-4T/5T/6T",
            StreamFormat::Ss2 => "NovAtel Superstar II",
            StreamFormat::Hemis => "Hemisphere Eclipse/Crescent",
            StreamFormat::Stq => "SkyTraq S1315F",
            StreamFormat::Gw10 => "Furuno GW10",
            StreamFormat::Javad => "Javad",
            StreamFormat::Nvs => "NVS BINR",
            StreamFormat::Binex => "BINEX",
            StreamFormat::Rt17 => "Trimble RT17",
        }
    }

    /// Whether the format may be produced on an output stream.
    ///
    /// All receiver-native formats and RTCM 2 are input only.
    pub fn is_output_capable(&self) -> bool {
        matches!(self, StreamFormat::Rtcm3)
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for StreamFormat {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamFormat::ALL
            .iter()
            .copied()
            .find(|format| format.tag() == s)
            .ok_or_else(|| EndpointError::UnknownFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_tags() {
        for format in StreamFormat::ALL {
            assert_eq!(format.tag().parse::<StreamFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            "rtcm4".parse::<StreamFormat>(),
            Err(EndpointError::UnknownFormat(tag)) if tag == "rtcm4"
        ));
    }

    #[test]
    fn test_only_rtcm3_is_output_capable() {
        let outputs: Vec<_> = StreamFormat::ALL
            .iter()
            .filter(|f| f.is_output_capable())
            .collect();
        assert_eq!(outputs, vec![&StreamFormat::Rtcm3]);
    }
}
