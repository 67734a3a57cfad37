//! Legacy audio elementary streams
//!
//! Frame header parsing for MP2 and AC-3 ([`header`]) and the assembler that
//! cuts a PES payload stream into whole access units ([`assembler`]).

pub mod assembler;
pub mod header;

use bytes::Bytes;
use ffmpeg_next::codec::Id;
use serde::Serialize;
use std::fmt;

pub use assembler::FrameAssembler;
pub use header::FrameHeader;

/// Source codecs the remuxer replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// MPEG-1/2 Audio Layer II
    Mp2,
    /// Dolby Digital
    Ac3,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Mp2 => "MP2",
            Codec::Ac3 => "AC-3",
        }
    }

    /// Samples per channel in one access unit
    pub fn samples_per_frame(&self) -> usize {
        match self {
            Codec::Mp2 => 1152,
            Codec::Ac3 => 1536,
        }
    }

    pub fn ffmpeg_id(&self) -> Id {
        match self {
            Codec::Mp2 => Id::MP2,
            Codec::Ac3 => Id::AC3,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One complete compressed audio frame
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub header: FrameHeader,
    /// Frame bytes, header included. Shorter than `header.frame_len` when the
    /// frame was cut off by the start of the next PES packet.
    pub data: Bytes,
    /// Presentation time in 90 kHz ticks, when a PES header supplied one
    pub pts: Option<u64>,
}

impl AccessUnit {
    pub fn codec(&self) -> Codec {
        self.header.codec
    }

    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.header.frame_len
    }
}

/// Decoded PCM, one `f32` vector per channel
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub sample_rate: u32,
    pub planes: Vec<Vec<f32>>,
    pub pts: Option<u64>,
}

impl SampleBlock {
    pub fn silence(sample_rate: u32, channels: u16, samples: usize, pts: Option<u64>) -> Self {
        Self {
            sample_rate,
            planes: vec![vec![0.0; samples]; channels as usize],
            pts,
        }
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Samples per channel
    pub fn samples(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }
}
