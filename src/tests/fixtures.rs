//! Test fixtures for integration tests
//!
//! Synthesizes real MP2 and AC-3 access units with FFmpeg's own encoders and
//! wraps them into a single-program transport stream (PAT, PMT, a fake video
//! PID and the audio PID). Also provides the helpers the tests use to pick
//! the remuxed output apart again.

use crate::audio::Codec;
use crate::ffmpeg::helpers::{self, decoder_exists, encoder_exists};
use crate::transcode::adts::AdtsHeader;
use crate::ts::pes::{self, PesDepacketizer};
use crate::ts::psi::{self, PAT_TABLE_ID, PMT_TABLE_ID};
use crate::ts::{TsHeader, PAT_PID, TS_PACKET_SIZE, TS_SYNC_BYTE};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::{Sample, Type};
use std::collections::HashMap;

pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;

/// 90 kHz ticks per access unit at 48 kHz
pub fn pts_step(codec: Codec) -> u64 {
    codec.samples_per_frame() as u64 * 90_000 / 48_000
}

/// Legacy audio stream parameters for a fixture
#[derive(Debug, Clone, Copy)]
pub struct ToneSpec {
    pub codec: Codec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: usize,
}

impl ToneSpec {
    /// MP2, 48 kHz stereo at 64 kbps: 192-byte frames
    pub fn mp2() -> Self {
        Self {
            codec: Codec::Mp2,
            sample_rate: 48000,
            channels: 2,
            bitrate: 64_000,
        }
    }

    /// AC-3, 48 kHz stereo at 192 kbps: 768-byte frames
    pub fn ac3() -> Self {
        Self {
            codec: Codec::Ac3,
            sample_rate: 48000,
            channels: 2,
            bitrate: 192_000,
        }
    }

    /// Whether this FFmpeg build can both produce and remux the stream
    pub fn available(&self) -> bool {
        crate::ffmpeg::init().is_ok()
            && encoder_exists(self.codec.ffmpeg_id())
            && decoder_exists(self.codec.ffmpeg_id())
            && encoder_exists(ffmpeg::codec::Id::AAC)
    }
}

/// Encode `frames` access units of a 440 Hz tone. Returns `None` when the
/// FFmpeg build lacks a needed codec.
pub fn encode_tone(spec: ToneSpec, frames: usize) -> Option<Vec<Vec<u8>>> {
    if !spec.available() {
        return None;
    }

    let codec = ffmpeg::codec::encoder::find(spec.codec.ffmpeg_id())?;
    let (format, layout) = match (spec.codec, spec.channels) {
        (Codec::Mp2, 1) => (Sample::I16(Type::Packed), ChannelLayout::MONO),
        (Codec::Mp2, _) => (Sample::I16(Type::Packed), ChannelLayout::STEREO),
        (Codec::Ac3, 1) => (Sample::F32(Type::Planar), ChannelLayout::MONO),
        (Codec::Ac3, _) => (Sample::F32(Type::Planar), ChannelLayout::STEREO),
    };

    let mut context = ffmpeg::codec::Context::new_with_codec(codec);
    context.set_time_base(ffmpeg::Rational::new(1, spec.sample_rate as i32));
    let mut audio = context.encoder().audio().ok()?;
    audio.set_rate(spec.sample_rate as i32);
    audio.set_format(format);
    audio.set_channel_layout(layout);
    audio.set_bit_rate(spec.bitrate);
    let mut encoder = audio.open_as(codec).ok()?;

    let frame_size = spec.codec.samples_per_frame();
    let mut units = Vec::new();
    let mut position = 0usize;

    while units.len() < frames {
        let mut frame = ffmpeg::util::frame::Audio::new(format, frame_size, layout);
        frame.set_rate(spec.sample_rate);
        frame.set_pts(Some(position as i64));
        let tone: Vec<f32> = (position..position + frame_size)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / spec.sample_rate as f32).sin() * 0.4)
            .collect();
        position += frame_size;

        match format {
            Sample::I16(Type::Packed) => {
                let data = helpers::audio_plane_data_mut(&mut frame, 0);
                let mut i = 0;
                for sample in &tone {
                    let bytes = ((sample * i16::MAX as f32) as i16).to_le_bytes();
                    for _ in 0..spec.channels {
                        data[i..i + 2].copy_from_slice(&bytes);
                        i += 2;
                    }
                }
            }
            _ => {
                let planes = vec![tone; spec.channels as usize];
                helpers::write_fltp_planes(&mut frame, &planes)?;
            }
        }

        encoder.send_frame(&frame).ok()?;
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            if let Some(data) = packet.data() {
                units.push(data.to_vec());
            }
        }
    }

    units.truncate(frames);
    Some(units)
}

/// A 188-byte packet header
fn header(pid: u16, payload_start: bool, adaptation: bool, cc: u8) -> [u8; 4] {
    [
        TS_SYNC_BYTE,
        if payload_start { 0x40 } else { 0x00 } | ((pid >> 8) as u8 & 0x1F),
        pid as u8,
        if adaptation { 0x30 } else { 0x10 } | (cc & 0x0F),
    ]
}

/// Builds a transport stream packet by packet
#[derive(Default)]
pub struct StreamBuilder {
    out: Vec<u8>,
    continuity: HashMap<u16, u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = self.continuity.entry(pid).or_insert(0x0F);
        *cc = (*cc + 1) & 0x0F;
        *cc
    }

    fn section_packet(&mut self, pid: u16, section: &[u8]) -> &mut Self {
        let cc = self.next_cc(pid);
        let start = self.out.len();
        self.out.extend_from_slice(&header(pid, true, false, cc));
        self.out.push(0x00);
        self.out.extend_from_slice(section);
        self.out.resize(start + TS_PACKET_SIZE, 0xFF);
        self
    }

    pub fn pat(&mut self) -> &mut Self {
        let body = [0x00, 0x01, 0xE0 | (PMT_PID >> 8) as u8, PMT_PID as u8];
        let section = psi::build_section(PAT_TABLE_ID, 1, &body);
        self.section_packet(PAT_PID, &section)
    }

    /// PMT with a video entry and one audio entry
    pub fn pmt(&mut self, audio_stream_type: u8, descriptors: &[u8]) -> &mut Self {
        let mut body = vec![0xE0 | (VIDEO_PID >> 8) as u8, VIDEO_PID as u8, 0xF0, 0x00];
        body.push(0x1B);
        body.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes());
        body.extend_from_slice(&[0xF0, 0x00]);
        body.push(audio_stream_type);
        body.extend_from_slice(&(0xE000 | AUDIO_PID).to_be_bytes());
        body.extend_from_slice(&(0xF000 | descriptors.len() as u16).to_be_bytes());
        body.extend_from_slice(descriptors);
        let section = psi::build_section(PMT_TABLE_ID, 1, &body);
        self.section_packet(PMT_PID, &section)
    }

    /// PAT and the PMT matching `codec`
    pub fn program(&mut self, codec: Codec) -> &mut Self {
        self.pat();
        match codec {
            Codec::Mp2 => self.pmt(psi::STREAM_TYPE_MPEG1_AUDIO, &[]),
            // DVB style: private PES with an AC-3 descriptor
            Codec::Ac3 => self.pmt(psi::STREAM_TYPE_PRIVATE_PES, &[0x6A, 0x01, 0x00]),
        }
    }

    /// A packet on the video PID; every one carries distinct bytes.
    pub fn video(&mut self) -> &mut Self {
        let cc = self.next_cc(VIDEO_PID);
        let seed = self.out.len() as u32;
        self.out.extend_from_slice(&header(VIDEO_PID, false, false, cc));
        self.out
            .extend((0..TS_PACKET_SIZE as u32 - 4).map(|i| (seed.wrapping_mul(31) ^ i) as u8));
        self
    }

    /// One PES packet on the audio PID around `payload`; returns the number
    /// of transport packets written.
    pub fn audio_pes(&mut self, stream_id: u8, payload: &[u8], pts: Option<u64>) -> usize {
        let pes = pes::build(stream_id, payload, pts);
        self.audio_raw(&pes, true)
    }

    /// Like [`audio_pes`](Self::audio_pes), but the first packet carries
    /// only the first `first_len` bytes of the PES packet.
    pub fn audio_pes_split(
        &mut self,
        stream_id: u8,
        payload: &[u8],
        pts: Option<u64>,
        first_len: usize,
    ) -> usize {
        let pes = pes::build(stream_id, payload, pts);
        self.audio_raw(&pes[..first_len], true) + self.audio_raw(&pes[first_len..], false)
    }

    /// Split raw bytes over audio packets, stuffing the last one.
    pub fn audio_raw(&mut self, data: &[u8], payload_start: bool) -> usize {
        let mut rest = data;
        let mut first = payload_start;
        let mut written = 0;
        while !rest.is_empty() {
            let take = rest.len().min(TS_PACKET_SIZE - 4);
            let stuffed = take < TS_PACKET_SIZE - 4;
            let cc = self.next_cc(AUDIO_PID);
            let start = self.out.len();
            self.out
                .extend_from_slice(&header(AUDIO_PID, first, stuffed, cc));
            if stuffed {
                let af_len = TS_PACKET_SIZE - 4 - 1 - take;
                self.out.push(af_len as u8);
                if af_len > 0 {
                    self.out.push(0x00);
                    self.out.resize(start + 5 + af_len, 0xFF);
                }
            }
            self.out.extend_from_slice(&rest[..take]);
            debug_assert_eq!(self.out.len() - start, TS_PACKET_SIZE);
            rest = &rest[take..];
            first = false;
            written += 1;
        }
        written
    }

    /// Append bytes as they are
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.out.extend_from_slice(data);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}

/// Audio PES stream id for a codec
pub fn stream_id(codec: Codec) -> u8 {
    match codec {
        Codec::Mp2 => pes::AUDIO_STREAM_ID,
        Codec::Ac3 => pes::PRIVATE_STREAM_1,
    }
}

/// PAT, PMT and `units` access units, one PES each, with a video packet
/// after every audio PES.
pub fn program_stream(codec: Codec, units: &[Vec<u8>]) -> Vec<u8> {
    let mut builder = StreamBuilder::new();
    builder.program(codec);
    for (i, unit) in units.iter().enumerate() {
        builder.audio_pes(stream_id(codec), unit, Some(90_000 + i as u64 * pts_step(codec)));
        builder.video();
    }
    builder.finish()
}

pub fn packets(data: &[u8]) -> Vec<&[u8]> {
    assert_eq!(data.len() % TS_PACKET_SIZE, 0, "output is not packet aligned");
    data.chunks_exact(TS_PACKET_SIZE).collect()
}

pub fn pid(packet: &[u8]) -> u16 {
    (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16
}

/// Packets not on `audio_pid`, in order
pub fn non_audio(data: &[u8], audio_pid: u16) -> Vec<Vec<u8>> {
    packets(data)
        .into_iter()
        .filter(|p| pid(p) != audio_pid)
        .map(<[u8]>::to_vec)
        .collect()
}

/// One AAC frame recovered from the output
#[derive(Debug, Clone)]
pub struct OutputFrame {
    pub adts: AdtsHeader,
    pub data: Vec<u8>,
    pub pts: Option<u64>,
}

/// Depacketize `audio_pid` from remuxed output into ADTS frames, checking
/// continuity counters along the way.
pub fn aac_frames(data: &[u8], audio_pid: u16) -> Vec<OutputFrame> {
    let mut depacketizer = PesDepacketizer::new();
    let mut es: Vec<u8> = Vec::new();
    let mut pts_marks = Vec::new();
    let mut last_cc: Option<u8> = None;

    for packet in packets(data).into_iter().filter(|p| pid(p) == audio_pid) {
        let header = TsHeader::parse(packet).unwrap();
        let Some(offset) = header.payload_offset(packet) else {
            continue;
        };
        if let Some(last) = last_cc {
            assert_eq!(header.continuity, (last + 1) & 0x0F, "continuity gap");
        }
        last_cc = Some(header.continuity);

        if let Some(fragment) = depacketizer.push(header.payload_start, &packet[offset..]) {
            if fragment.pes_start {
                pts_marks.push((es.len(), fragment.pts));
            }
            es.extend_from_slice(fragment.data);
        }
    }

    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < es.len() {
        let (adts, len) = AdtsHeader::parse(&es[pos..]).expect("ADTS header");
        let pts = pts_marks
            .iter()
            .find(|(offset, _)| *offset == pos)
            .and_then(|(_, pts)| *pts);
        frames.push(OutputFrame {
            adts,
            data: es[pos..pos + len].to_vec(),
            pts,
        });
        pos += len;
    }
    frames
}

/// Decode ADTS frames with FFmpeg's AAC decoder; returns samples per channel.
pub fn decode_aac(frames: &[OutputFrame]) -> Option<usize> {
    if !decoder_exists(ffmpeg::codec::Id::AAC) {
        return None;
    }
    let codec = ffmpeg::codec::decoder::find(ffmpeg::codec::Id::AAC)?;
    let mut decoder = ffmpeg::codec::Context::new_with_codec(codec)
        .decoder()
        .audio()
        .ok()?;
    let mut samples = 0;
    let mut frame = ffmpeg::util::frame::Audio::empty();
    for output in frames {
        let packet = ffmpeg::codec::packet::Packet::copy(&output.data);
        decoder.send_packet(&packet).ok()?;
        while decoder.receive_frame(&mut frame).is_ok() {
            samples += frame.samples();
        }
    }
    Some(samples)
}

/// Run a whole stream through a fresh session in one call.
pub fn remux_all(
    config: crate::config::RemuxConfig,
    options: crate::config::RemuxOptions,
    input: &[u8],
) -> (Vec<u8>, crate::session::Session) {
    let mut session = crate::session::Session::new(config, options).unwrap();
    let mut output = vec![0u8; input.len() * 4 + 64 * 1024];
    let n = session.process(input, &mut output).unwrap();
    output.truncate(n);
    (output, session)
}
