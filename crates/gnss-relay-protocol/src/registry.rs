//! Format tag to codec mapping.

use std::collections::HashMap;

use gnss_relay_core::{StationOverrides, StreamFormat};

use crate::codec::{Decoder, Encoder};
use crate::error::CodecError;
use crate::oem4::{Oem4Decoder, Oem4Framing};
use crate::rtcm3::{Rtcm3Decoder, Rtcm3Encoder, Rtcm3Framing};
use crate::skytraq::{SkytraqDecoder, SkytraqFraming};
use crate::ubx::{UbxDecoder, UbxFraming};

/// Builds a decoder from the receiver option string.
pub type DecoderFactory = fn(&str) -> Box<dyn Decoder>;

/// Builds an encoder applying the given station overrides.
pub type EncoderFactory = fn(&StationOverrides) -> Box<dyn Encoder>;

/// Registry of decoder and encoder constructors by format.
#[derive(Clone)]
pub struct CodecRegistry {
    decoders: HashMap<StreamFormat, DecoderFactory>,
    encoders: HashMap<StreamFormat, EncoderFactory>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
            encoders: HashMap::new(),
        }
    }

    pub fn register_decoder(&mut self, format: StreamFormat, factory: DecoderFactory) {
        self.decoders.insert(format, factory);
    }

    pub fn register_encoder(&mut self, format: StreamFormat, factory: EncoderFactory) {
        self.encoders.insert(format, factory);
    }

    pub fn has_decoder(&self, format: StreamFormat) -> bool {
        self.decoders.contains_key(&format)
    }

    pub fn has_encoder(&self, format: StreamFormat) -> bool {
        self.encoders.contains_key(&format)
    }

    pub fn decoder(&self, format: StreamFormat, options: &str) -> Result<Box<dyn Decoder>, CodecError> {
        self.decoders
            .get(&format)
            .map(|factory| factory(options))
            .ok_or(CodecError::NoDecoder(format))
    }

    pub fn encoder(
        &self,
        format: StreamFormat,
        overrides: &StationOverrides,
    ) -> Result<Box<dyn Encoder>, CodecError> {
        self.encoders
            .get(&format)
            .map(|factory| factory(overrides))
            .ok_or(CodecError::NoEncoder(format))
    }
}

impl Default for CodecRegistry {
    /// Registry with every built-in codec.
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register_decoder(StreamFormat::Rtcm3, rtcm3_decoder);
        registry.register_decoder(StreamFormat::Ubx, ubx_decoder);
        registry.register_decoder(StreamFormat::Nov, oem4_decoder);
        registry.register_decoder(StreamFormat::Stq, skytraq_decoder);
        registry.register_encoder(StreamFormat::Rtcm3, rtcm3_encoder);
        registry
    }
}

fn rtcm3_decoder(_options: &str) -> Box<dyn Decoder> {
    Box::new(Rtcm3Decoder::new(Rtcm3Framing))
}

fn ubx_decoder(_options: &str) -> Box<dyn Decoder> {
    Box::new(UbxDecoder::new(UbxFraming))
}

fn oem4_decoder(_options: &str) -> Box<dyn Decoder> {
    Box::new(Oem4Decoder::new(Oem4Framing))
}

fn skytraq_decoder(_options: &str) -> Box<dyn Decoder> {
    Box::new(SkytraqDecoder::new(SkytraqFraming))
}

fn rtcm3_encoder(overrides: &StationOverrides) -> Box<dyn Encoder> {
    Box::new(Rtcm3Encoder::new(overrides.clone()))
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut decoders: Vec<_> = self.decoders.keys().map(|f| f.tag()).collect();
        let mut encoders: Vec<_> = self.encoders.keys().map(|f| f.tag()).collect();
        decoders.sort_unstable();
        encoders.sort_unstable();
        f.debug_struct("CodecRegistry")
            .field("decoders", &decoders)
            .field("encoders", &encoders)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = CodecRegistry::default();
        for format in [StreamFormat::Rtcm3, StreamFormat::Ubx, StreamFormat::Nov, StreamFormat::Stq] {
            let decoder = registry.decoder(format, "").unwrap();
            assert_eq!(decoder.format(), format);
        }
        assert!(matches!(
            registry.decoder(StreamFormat::Rtcm2, ""),
            Err(CodecError::NoDecoder(StreamFormat::Rtcm2))
        ));

        let encoder = registry.encoder(StreamFormat::Rtcm3, &StationOverrides::default()).unwrap();
        assert_eq!(encoder.format(), StreamFormat::Rtcm3);
        assert!(matches!(
            registry.encoder(StreamFormat::Ubx, &StationOverrides::default()),
            Err(CodecError::NoEncoder(StreamFormat::Ubx))
        ));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = CodecRegistry::new();
        assert!(!registry.has_decoder(StreamFormat::Binex));
        registry.register_decoder(StreamFormat::Binex, rtcm3_decoder);
        assert!(registry.has_decoder(StreamFormat::Binex));
        assert!(!registry.has_encoder(StreamFormat::Rtcm3));
    }
}
