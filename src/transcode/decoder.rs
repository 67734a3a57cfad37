//! Legacy audio decoder
//!
//! Wraps an FFmpeg `AVCodecContext` to decode MP2 or AC-3 access units into
//! planar `f32` blocks at the session's channel count.

use super::converter::FrameConverter;
use crate::audio::{AccessUnit, Codec, SampleBlock};
use crate::error::{FfmpegError, RemuxError, Result};
use ffmpeg_next as ffmpeg;
use tracing::debug;

/// Decoder for the codec the stream locked onto
pub enum Decoder {
    Mp2(CodecDecoder),
    Ac3(CodecDecoder),
}

impl Decoder {
    /// Open a decoder producing blocks at `sample_rate` with `channels`
    /// channels.
    pub fn open(codec: Codec, sample_rate: u32, channels: u16) -> Result<Self> {
        let inner = CodecDecoder::open(codec, sample_rate, channels)?;
        Ok(match codec {
            Codec::Mp2 => Decoder::Mp2(inner),
            Codec::Ac3 => Decoder::Ac3(inner),
        })
    }

    pub fn codec(&self) -> Codec {
        match self {
            Decoder::Mp2(_) => Codec::Mp2,
            Decoder::Ac3(_) => Codec::Ac3,
        }
    }

    /// Decode one access unit.
    ///
    /// Every failure is a `Decode` error scoped to this unit; the decoder
    /// stays usable for the next one.
    pub fn decode(&mut self, au: &AccessUnit) -> Result<SampleBlock> {
        let codec = self.codec();
        if au.codec() != codec {
            return Err(RemuxError::Decode(format!(
                "{} access unit sent to {} decoder",
                au.codec(),
                codec
            )));
        }
        let inner = match self {
            Decoder::Mp2(inner) | Decoder::Ac3(inner) => inner,
        };
        inner.decode(au)
    }

    /// Frames decoded so far
    pub fn frames_decoded(&self) -> u64 {
        match self {
            Decoder::Mp2(inner) | Decoder::Ac3(inner) => inner.frames_decoded,
        }
    }
}

/// Real audio decoder backed by an FFmpeg codec context
pub struct CodecDecoder {
    decoder: ffmpeg::decoder::Audio,
    converter: Option<FrameConverter>,
    codec: Codec,
    sample_rate: u32,
    channels: u16,
    frames_decoded: u64,
}

impl CodecDecoder {
    fn open(codec: Codec, sample_rate: u32, channels: u16) -> Result<Self> {
        crate::ffmpeg::init()?;

        let ff_codec = ffmpeg::codec::decoder::find(codec.ffmpeg_id()).ok_or_else(|| {
            RemuxError::Ffmpeg(FfmpegError::DecoderNotFound(format!(
                "{} decoder not found in this FFmpeg build",
                codec
            )))
        })?;

        let context = ffmpeg::codec::Context::new_with_codec(ff_codec);
        let decoder = context.decoder().audio().map_err(|e| {
            RemuxError::Ffmpeg(FfmpegError::DecoderCreate(format!(
                "Failed to open {} decoder: {}",
                codec, e
            )))
        })?;

        debug!(codec = %codec, sample_rate, channels, "decoder opened");

        Ok(Self {
            decoder,
            converter: None,
            codec,
            sample_rate,
            channels,
            frames_decoded: 0,
        })
    }

    fn decode(&mut self, au: &AccessUnit) -> Result<SampleBlock> {
        let header = &au.header;
        if au.is_truncated() {
            return Err(RemuxError::Decode(format!(
                "truncated {} frame: {} of {} bytes",
                self.codec,
                au.data.len(),
                header.frame_len
            )));
        }
        if header.sample_rate != self.sample_rate {
            return Err(RemuxError::Decode(format!(
                "sample rate mismatch: stream is {} Hz, session expects {} Hz",
                header.sample_rate, self.sample_rate
            )));
        }

        let packet = ffmpeg::codec::packet::Packet::copy(&au.data);
        self.decoder.send_packet(&packet).map_err(|e| {
            RemuxError::Decode(format!("{} decoder rejected frame: {}", self.codec, e))
        })?;

        let mut planes: Vec<Vec<f32>> = vec![Vec::new(); self.channels as usize];
        let mut received = 0usize;
        // after a bad frame the rest is still drained so nothing carries
        // over into the next unit
        let mut failure = None;
        loop {
            let mut frame = ffmpeg::util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) if failure.is_some() => {}
                Ok(()) => match self
                    .check_frame(&frame, au)
                    .and_then(|()| self.convert(&frame))
                {
                    Ok(converted) => {
                        for (dst, src) in planes.iter_mut().zip(converted) {
                            dst.extend_from_slice(&src);
                        }
                        received += 1;
                    }
                    Err(e) => failure = Some(e),
                },
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(failure.unwrap_or_else(|| {
                        RemuxError::Decode(format!("{} decoder failed: {}", self.codec, e))
                    }))
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if received == 0 {
            return Err(RemuxError::Decode(format!(
                "{} decoder produced no samples",
                self.codec
            )));
        }
        self.frames_decoded += 1;

        Ok(SampleBlock {
            sample_rate: self.sample_rate,
            planes,
            pts: au.pts,
        })
    }

    fn check_frame(&self, frame: &ffmpeg::util::frame::Audio, au: &AccessUnit) -> Result<()> {
        let header = &au.header;
        if frame.rate() != header.sample_rate {
            return Err(RemuxError::Decode(format!(
                "decoded rate {} Hz does not match header rate {} Hz",
                frame.rate(),
                header.sample_rate
            )));
        }
        if frame.channels() != header.channels {
            return Err(RemuxError::Decode(format!(
                "decoded {} channel(s), header declares {}",
                frame.channels(),
                header.channels
            )));
        }
        if frame.samples() != header.samples() {
            return Err(RemuxError::Decode(format!(
                "decoded {} samples, {} frames carry {}",
                frame.samples(),
                self.codec,
                header.samples()
            )));
        }
        Ok(())
    }

    fn convert(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<Vec<Vec<f32>>> {
        let converter = match self.converter.take() {
            Some(converter) if converter.accepts(frame) => converter,
            _ => FrameConverter::new(frame, self.channels)?,
        };
        self.converter.insert(converter).convert(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::helpers::decoder_exists;
    use crate::tests::fixtures::{encode_tone, ToneSpec};

    #[test]
    fn test_create_mp2_decoder() {
        if !decoder_exists(ffmpeg::codec::Id::MP2) {
            return;
        }
        let decoder = Decoder::open(Codec::Mp2, 48000, 2).unwrap();
        assert_eq!(decoder.codec(), Codec::Mp2);
        assert_eq!(decoder.frames_decoded(), 0);
    }

    #[test]
    fn test_create_ac3_decoder() {
        if !decoder_exists(ffmpeg::codec::Id::AC3) {
            return;
        }
        let decoder = Decoder::open(Codec::Ac3, 48000, 2).unwrap();
        assert_eq!(decoder.codec(), Codec::Ac3);
    }

    #[test]
    fn test_rate_mismatch_is_decode_error() {
        if !decoder_exists(ffmpeg::codec::Id::MP2) {
            return;
        }
        let mut decoder = Decoder::open(Codec::Mp2, 48000, 2).unwrap();
        // 44.1 kHz header
        let mut data = vec![0u8; 417];
        data[..4].copy_from_slice(&[0xFF, 0xFD, 0x80, 0x00]);
        let header = match crate::audio::header::parse_mp2(&data) {
            crate::audio::header::Probe::Header(h) => h,
            other => panic!("unexpected {:?}", other),
        };
        let au = AccessUnit {
            header,
            data: data.into(),
            pts: None,
        };
        let err = decoder.decode(&au).unwrap_err();
        assert!(matches!(err, RemuxError::Decode(_)));
        assert!(err.to_string().contains("44100"));
    }

    #[test]
    fn test_rejected_frame_does_not_leak_into_next_unit() {
        let Some(units) = encode_tone(ToneSpec::mp2(), 2) else {
            return;
        };
        let mut decoder = Decoder::open(Codec::Mp2, 48000, 2).unwrap();
        let unit = |data: &[u8]| {
            let header = match crate::audio::header::parse_mp2(data) {
                crate::audio::header::Probe::Header(h) => h,
                other => panic!("unexpected {:?}", other),
            };
            AccessUnit {
                header,
                data: data.to_vec().into(),
                pts: None,
            }
        };

        // header claims mono, the decoder sees stereo
        let mut mislabelled = unit(&units[0]);
        mislabelled.header.channels = 1;
        let err = decoder.decode(&mislabelled).unwrap_err();
        assert!(matches!(err, RemuxError::Decode(_)));
        assert!(err.to_string().contains("channel"));

        let block = decoder.decode(&unit(&units[1])).unwrap();
        assert_eq!(block.channels(), 2);
        assert_eq!(block.samples(), 1152);
        assert_eq!(decoder.frames_decoded(), 1);
    }
}
