//! # gnss-relay-protocol
//!
//! Protocol capabilities of the GNSS stream relay.
//!
//! This crate provides:
//! - The [`Decoder`] and [`Encoder`] traits the relay depends on
//! - A generic streaming [`FrameDecoder`] with resynchronization
//! - Framings for RTCM 3, u-blox UBX, NovAtel OEM4 and SkyTraq
//! - An RTCM 3 encoder applying station overrides
//! - The [`CodecRegistry`] mapping format tags to codecs
//! - The per-output [`Converter`]

pub mod bits;
pub mod codec;
pub mod converter;
pub mod crc;
pub mod error;
pub mod framing;
pub mod message;
pub mod oem4;
pub mod registry;
pub mod rtcm3;
pub mod skytraq;
pub mod station;
pub mod ubx;

pub use codec::{DecodeStats, Decoder, Encoder};
pub use converter::{ConvertStats, Converter};
pub use error::CodecError;
pub use framing::{FrameDecoder, Framing};
pub use message::Message;
pub use registry::CodecRegistry;
