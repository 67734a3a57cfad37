//! Sample format and channel layout conversion
//!
//! Converts decoded PCM frames to planar `f32` at the session's channel
//! layout using FFmpeg's `SwrContext`. Source and target rates are always
//! equal; multichannel AC-3 is downmixed by the context's default matrix.

use crate::error::{FfmpegError, RemuxError, Result};
use crate::ffmpeg::helpers;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

/// Sample format required by the AAC encoder
pub const TARGET_SAMPLE_FORMAT: Sample = Sample::F32(ffmpeg::util::format::sample::Type::Planar);

/// Output layout for a channel count
pub fn target_layout(channels: u16) -> ChannelLayout {
    if channels == 1 {
        ChannelLayout::MONO
    } else {
        ChannelLayout::STEREO
    }
}

/// Layout of a decoded frame, guessed from its channel count when unset
fn source_layout(frame: &ffmpeg::util::frame::Audio) -> ChannelLayout {
    if frame.channel_layout().bits() != 0 {
        return frame.channel_layout();
    }
    match frame.channels() {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        n => ChannelLayout::default(n as i32),
    }
}

/// Converter wrapping FFmpeg's `SwrContext`
pub struct FrameConverter {
    context: resampling::Context,
    source: (Sample, ChannelLayout, u32),
    channels: u16,
}

impl FrameConverter {
    /// Create a converter from the format described by `src_frame` to planar
    /// float at `channels` channels, same rate.
    pub fn new(src_frame: &ffmpeg::util::frame::Audio, channels: u16) -> Result<Self> {
        let source = (src_frame.format(), source_layout(src_frame), src_frame.rate());
        let context = resampling::Context::get(
            source.0,
            source.1,
            source.2,
            TARGET_SAMPLE_FORMAT,
            target_layout(channels),
            source.2,
        )
        .map_err(|e| {
            RemuxError::Ffmpeg(FfmpegError::ResamplerCreate(format!(
                "{:?} {} Hz, {} channel(s) to FLTP: {}",
                source.0,
                source.2,
                src_frame.channels(),
                e
            )))
        })?;

        Ok(Self {
            context,
            source,
            channels,
        })
    }

    /// Whether `frame` has the format this converter was built for
    pub fn accepts(&self, frame: &ffmpeg::util::frame::Audio) -> bool {
        (frame.format(), source_layout(frame), frame.rate()) == self.source
    }

    /// Convert one decoded frame into per-channel sample vectors.
    pub fn convert(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<Vec<Vec<f32>>> {
        // The output frame must be empty: swr_convert_frame allocates it from
        // the context configuration.
        let mut out = ffmpeg::util::frame::Audio::empty();

        self.context
            .run(frame, &mut out)
            .map_err(|e| RemuxError::Decode(format!("sample conversion failed: {}", e)))?;

        if out.samples() == 0 {
            return Ok(vec![Vec::new(); self.channels as usize]);
        }

        helpers::read_fltp_planes(&out)
            .ok_or_else(|| RemuxError::Decode("converted frame has unreadable planes".into()))
    }
}
