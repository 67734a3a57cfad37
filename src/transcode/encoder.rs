//! AAC encoder for the transcoding pipeline
//!
//! Wraps an FFmpeg `AVCodecContext` to encode planar float PCM to AAC-LC.
//! Decoded blocks rarely line up with the encoder's 1024-sample frames, so
//! samples are queued per channel and fed to the encoder in whole frames.
//! Encoded packets come back ADTS-framed and stamped with a 90 kHz PTS.

use super::adts::AdtsHeader;
use super::converter::{target_layout, TARGET_SAMPLE_FORMAT};
use crate::audio::SampleBlock;
use crate::config::RemuxConfig;
use crate::error::{FfmpegError, RemuxError, Result};
use crate::ffmpeg::helpers;
use crate::ts::PTS_MASK;
use bytes::{BufMut, Bytes, BytesMut};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use std::collections::VecDeque;
use tracing::debug;

/// AAC encoder frame size (number of samples per channel per frame)
pub const AAC_FRAME_SIZE: usize = 1024;

/// Per-channel FIFO between the decoder and the encoder
#[derive(Debug, Clone, Default)]
pub struct SampleQueue {
    planes: Vec<VecDeque<f32>>,
}

impl SampleQueue {
    pub fn new(channels: usize) -> Self {
        Self {
            planes: vec![VecDeque::new(); channels],
        }
    }

    /// Samples queued per channel
    pub fn len(&self) -> usize {
        self.planes.first().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, planes: &[Vec<f32>]) {
        for (queue, plane) in self.planes.iter_mut().zip(planes) {
            queue.extend(plane.iter().copied());
        }
    }

    /// Exactly `frame_size` samples per channel, or `None` if fewer are queued.
    pub fn pop_frame(&mut self, frame_size: usize) -> Option<Vec<Vec<f32>>> {
        if self.len() < frame_size {
            return None;
        }
        Some(
            self.planes
                .iter_mut()
                .map(|queue| queue.drain(..frame_size).collect())
                .collect(),
        )
    }

    /// Zero-pad up to the next multiple of `frame_size`.
    pub fn pad_to_frame(&mut self, frame_size: usize) {
        let rem = self.len() % frame_size;
        if rem == 0 {
            return;
        }
        for queue in &mut self.planes {
            queue.extend(std::iter::repeat(0.0).take(frame_size - rem));
        }
    }

}

/// Maps encoder sample positions to 90 kHz presentation times
#[derive(Debug, Clone)]
struct Timeline {
    sample_rate: u32,
    /// (sample position, PTS) pairs in position order
    anchors: VecDeque<(i64, u64)>,
}

impl Timeline {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            anchors: VecDeque::new(),
        }
    }

    fn anchor(&mut self, position: i64, pts: u64) {
        self.anchors.push_back((position, pts));
    }

    /// PTS of the sample at `position`, extrapolated from the newest anchor
    /// at or before it (or the oldest anchor for positions before it).
    fn pts_at(&mut self, position: i64) -> Option<u64> {
        while self.anchors.len() > 1 && self.anchors[1].0 <= position {
            self.anchors.pop_front();
        }
        let &(anchor_position, anchor_pts) = self.anchors.front()?;
        let delta = (position - anchor_position) as i128 * 90_000 / self.sample_rate as i128;
        Some((anchor_pts as i128 + delta).rem_euclid(PTS_MASK as i128 + 1) as u64)
    }
}

/// One encoded AAC frame, ADTS header included
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub pts: Option<u64>,
}

/// AAC encoder backed by a real FFmpeg codec context
pub struct AacEncoder {
    encoder: ffmpeg::encoder::Audio,
    config: RemuxConfig,
    layout: ChannelLayout,
    frame_size: usize,
    adts: AdtsHeader,
    queue: SampleQueue,
    timeline: Timeline,
    /// Position of the next sample pushed into the queue
    queued_position: i64,
    /// Position of the next frame sent to the encoder
    sent_position: i64,
    /// Packets received but not yet handed out
    ready: Vec<EncodedFrame>,
    frames_encoded: u64,
}

impl AacEncoder {
    /// Open an AAC encoder for the session parameters.
    pub fn open(config: &RemuxConfig) -> Result<Self> {
        crate::ffmpeg::init()?;

        let adts = AdtsHeader::new(config.sample_rate, config.channels).ok_or_else(|| {
            RemuxError::Config(format!(
                "{} Hz / {} channel(s) cannot be signalled in ADTS",
                config.sample_rate, config.channels
            ))
        })?;
        let layout = target_layout(config.channels);
        let (encoder, frame_size) = open_codec(config, layout)?;

        debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            bitrate = config.bitrate,
            frame_size,
            "AAC encoder opened"
        );

        Ok(Self {
            encoder,
            config: *config,
            layout,
            frame_size,
            adts,
            queue: SampleQueue::new(config.channels as usize),
            timeline: Timeline::new(config.sample_rate),
            queued_position: 0,
            sent_position: 0,
            ready: Vec::new(),
            frames_encoded: 0,
        })
    }

    /// The number of samples per channel the AAC encoder expects per frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting for a full frame
    pub fn queued_samples(&self) -> usize {
        self.queue.len()
    }

    /// AAC frames produced so far
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    /// Queue a decoded block and encode every whole frame now available.
    ///
    /// Frames encoded before a failure are kept and returned by the next
    /// successful `push` or `flush`.
    pub fn push(&mut self, block: &SampleBlock) -> Result<Vec<EncodedFrame>> {
        if block.channels() != self.config.channels as usize {
            return Err(RemuxError::Encode(format!(
                "block has {} channel(s), encoder expects {}",
                block.channels(),
                self.config.channels
            )));
        }
        if let Some(pts) = block.pts {
            self.timeline.anchor(self.queued_position, pts);
        }
        self.queue.push(&block.planes);
        self.queued_position += block.samples() as i64;

        while let Some(planes) = self.queue.pop_frame(self.frame_size) {
            self.send_frame(&planes)?;
            self.receive_packets()?;
        }
        Ok(std::mem::take(&mut self.ready))
    }

    /// Encode the queued remainder (zero-padded to a whole frame) and drain
    /// the encoder. The encoder is reopened afterwards so the session can
    /// keep going.
    pub fn flush(&mut self) -> Result<Vec<EncodedFrame>> {
        if !self.queue.is_empty() {
            self.queue.pad_to_frame(self.frame_size);
            while let Some(planes) = self.queue.pop_frame(self.frame_size) {
                self.send_frame(&planes)?;
                self.receive_packets()?;
            }
        }
        // padding is not real input
        self.queued_position = self.sent_position;

        self.encoder
            .send_eof()
            .map_err(|e| RemuxError::Encode(format!("AAC encoder send_eof error: {}", e)))?;
        self.receive_packets()?;

        let (encoder, frame_size) = open_codec(&self.config, self.layout)?;
        self.encoder = encoder;
        self.frame_size = frame_size;
        Ok(std::mem::take(&mut self.ready))
    }

    fn send_frame(&mut self, planes: &[Vec<f32>]) -> Result<()> {
        let mut frame =
            ffmpeg::util::frame::Audio::new(TARGET_SAMPLE_FORMAT, self.frame_size, self.layout);
        frame.set_rate(self.config.sample_rate);
        frame.set_pts(Some(self.sent_position));
        helpers::write_fltp_planes(&mut frame, planes)
            .ok_or_else(|| RemuxError::Encode("cannot fill encoder frame".into()))?;

        self.encoder
            .send_frame(&frame)
            .map_err(|e| RemuxError::Encode(format!("AAC encoder send_frame error: {}", e)))?;
        self.sent_position += self.frame_size as i64;
        Ok(())
    }

    fn receive_packets(&mut self) -> Result<()> {
        loop {
            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let Some(payload) = packet.data() else {
                        continue;
                    };
                    let header = self.adts.write(payload.len()).ok_or_else(|| {
                        RemuxError::Encode(format!(
                            "AAC frame of {} bytes too large for ADTS",
                            payload.len()
                        ))
                    })?;
                    let mut data = BytesMut::with_capacity(header.len() + payload.len());
                    data.put_slice(&header);
                    data.put_slice(payload);

                    let position = packet
                        .pts()
                        .unwrap_or(self.frames_encoded as i64 * self.frame_size as i64);
                    self.ready.push(EncodedFrame {
                        data: data.freeze(),
                        pts: self.timeline.pts_at(position),
                    });
                    self.frames_encoded += 1;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => {
                    return Err(RemuxError::Encode(format!(
                        "AAC encoder receive_packet error: {}",
                        e
                    )))
                }
            }
        }
    }
}

fn open_codec(
    config: &RemuxConfig,
    layout: ChannelLayout,
) -> Result<(ffmpeg::encoder::Audio, usize)> {
    let aac = codec::encoder::find(codec::Id::AAC).ok_or_else(|| {
        RemuxError::Ffmpeg(FfmpegError::EncoderNotFound(
            "AAC encoder not found in this FFmpeg build".into(),
        ))
    })?;

    // Build context and configure the audio encoder BEFORE opening
    let mut context = codec::Context::new_with_codec(aac);
    context.set_time_base(ffmpeg::Rational::new(1, config.sample_rate as i32));

    let mut audio_enc = context.encoder().audio().map_err(|e| {
        RemuxError::Ffmpeg(FfmpegError::EncoderCreate(format!(
            "Cannot get audio encoder handle: {}",
            e
        )))
    })?;

    audio_enc.set_rate(config.sample_rate as i32);
    audio_enc.set_format(TARGET_SAMPLE_FORMAT);
    audio_enc.set_channel_layout(layout);
    audio_enc.set_bit_rate(config.bitrate as usize);

    let encoder = audio_enc.open_as(aac).map_err(|e| {
        RemuxError::Ffmpeg(FfmpegError::EncoderCreate(format!(
            "Failed to open AAC encoder: {}",
            e
        )))
    })?;

    let frame_size = match encoder.frame_size() as usize {
        0 => AAC_FRAME_SIZE,
        n => n,
    };
    Ok((encoder, frame_size))
}
