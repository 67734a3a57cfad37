//! Audio transcoding module
//!
//! This module turns legacy access units into AAC frames:
//! - MP2 / AC-3 decoding through FFmpeg
//! - Sample format and channel layout conversion (no rate conversion)
//! - Sample queueing and AAC-LC encoding with ADTS framing

pub mod adts;
pub mod converter;
pub mod decoder;
pub mod encoder;

pub use decoder::Decoder;
pub use encoder::{AacEncoder, EncodedFrame, SampleQueue};
