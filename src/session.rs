//! Remux session
//!
//! A session owns one transport stream's worth of state: the packet reader
//! with its residual tail, the PES depacketizer and frame assembler for the
//! audio track, the decoder (opened once the codec is known), the AAC
//! encoder with its sample queue, and the output packetizer.
//!
//! Output of a call is staged in full before anything is copied to the
//! caller's buffer, so a buffer that is too small is never partially
//! written. Staged bytes that did not fit are handed out first on the next
//! call.

use crate::audio::{AccessUnit, FrameAssembler, SampleBlock};
use crate::config::{DecodeErrorPolicy, RemuxConfig, RemuxOptions};
use crate::error::{RemuxError, Result};
use crate::transcode::{AacEncoder, Decoder};
use crate::ts::pes::PesDepacketizer;
use crate::ts::reader::AudioPacket;
use crate::ts::{psi, PacketKind, TsReader, TsWriter};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Counters kept over the lifetime of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Transport packets read from the input
    pub packets_in: u64,
    /// Packets copied to the output unchanged
    pub passthrough_packets: u64,
    /// PMT packets rewritten to announce AAC
    pub pmt_rewritten: u64,
    pub audio_packets_in: u64,
    pub audio_packets_out: u64,
    /// Legacy access units cut from the audio track
    pub access_units: u64,
    pub decode_errors: u64,
    pub silence_substituted: u64,
    pub aac_frames: u64,
    pub resyncs: u64,
    pub continuity_errors: u64,
    /// Bytes handed to the caller
    pub bytes_out: u64,
}

pub struct Session {
    config: RemuxConfig,
    options: RemuxOptions,
    reader: TsReader,
    pes: PesDepacketizer,
    assembler: FrameAssembler,
    decoder: Option<Decoder>,
    encoder: AacEncoder,
    writer: Option<TsWriter>,
    /// Output staged but not yet delivered
    pending: Vec<u8>,
    last_error: Option<String>,
    stats: SessionStats,
}

impl Session {
    /// Create a session. Configuration and options are validated here, and
    /// the AAC encoder is opened up front so an unusable configuration fails
    /// now rather than on the first packet.
    pub fn new(config: RemuxConfig, options: RemuxOptions) -> Result<Self> {
        config.validate()?;
        options.validate()?;
        crate::ffmpeg::init()?;

        let encoder = AacEncoder::open(&config)?;

        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            bitrate = config.bitrate,
            policy = ?options.decode_error_policy,
            "remux session created"
        );

        Ok(Self {
            reader: TsReader::new(&options),
            pes: PesDepacketizer::new(),
            assembler: FrameAssembler::new(options.max_access_unit_size),
            decoder: None,
            encoder,
            writer: None,
            pending: Vec::new(),
            last_error: None,
            stats: SessionStats::default(),
            config,
            options,
        })
    }

    pub fn config(&self) -> &RemuxConfig {
        &self.config
    }

    pub fn options(&self) -> &RemuxOptions {
        &self.options
    }

    /// Most recent failure seen by this session, including access units
    /// that were dropped without failing the call.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Bytes staged for the caller but not yet delivered
    pub fn pending_output(&self) -> usize {
        self.pending.len()
    }

    /// Bytes buffered from the input that do not yet form a whole packet
    pub fn residual_input(&self) -> usize {
        self.reader.residual()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            resyncs: self.reader.resyncs(),
            continuity_errors: self.reader.continuity_errors(),
            ..self.stats.clone()
        }
    }

    /// Remux one input chunk into `output`, returning the bytes written.
    ///
    /// The chunk may start and end anywhere; partial packets and partial
    /// frames are kept for the next call. On `OutputTooSmall` nothing is
    /// written and the staged output is kept, so the call can be repeated
    /// with an empty input and a larger buffer.
    pub fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        self.last_error = None;
        self.reader.feed(input);

        let mut staged = std::mem::take(&mut self.pending);
        let result = self.remux(&mut staged);
        self.pending = staged;

        result.and_then(|()| self.deliver(output)).map_err(|e| self.fail(e))
    }

    /// End of stream: encode whatever samples are still queued (padded to a
    /// whole frame) and drain the encoder. The session stays usable.
    pub fn flush(&mut self, output: &mut [u8]) -> Result<usize> {
        self.last_error = None;

        let mut staged = std::mem::take(&mut self.pending);
        let result = self.drain_encoder(&mut staged);
        self.pending = staged;

        result.and_then(|()| self.deliver(output)).map_err(|e| self.fail(e))
    }

    fn fail(&mut self, error: RemuxError) -> RemuxError {
        debug!(code = error.code(), "{}", error);
        self.last_error = Some(error.to_string());
        error
    }

    fn deliver(&mut self, output: &mut [u8]) -> Result<usize> {
        let needed = self.pending.len();
        if needed > output.len() {
            return Err(RemuxError::OutputTooSmall {
                needed,
                capacity: output.len(),
            });
        }
        output[..needed].copy_from_slice(&self.pending);
        self.pending.clear();
        self.stats.bytes_out += needed as u64;
        Ok(needed)
    }

    fn remux(&mut self, out: &mut Vec<u8>) -> Result<()> {
        // units left over from a call that failed part way
        self.transcode_ready(out)?;

        while let Some(packet) = self.reader.next_packet()? {
            self.stats.packets_in += 1;
            match self.reader.classify(&packet) {
                PacketKind::Passthrough => {
                    self.stats.passthrough_packets += 1;
                    out.extend_from_slice(&packet);
                }
                PacketKind::Pmt => {
                    self.check_output_pid()?;
                    self.write_pmt(&packet, out);
                }
                PacketKind::Audio(audio) => self.on_audio(audio, &packet, out)?,
                PacketKind::Dropped => {}
            }
        }
        Ok(())
    }

    /// The AAC PID must not land on a table or on another stream of the
    /// program. Checked whenever a PMT goes by, before it is written.
    fn check_output_pid(&self) -> Result<()> {
        match self.options.output_audio_pid {
            Some(pid) if self.reader.pid_in_use(pid) => Err(RemuxError::Config(format!(
                "output_audio_pid {:#x} is already used by the program",
                pid
            ))),
            _ => Ok(()),
        }
    }

    fn write_pmt(&mut self, packet: &[u8], out: &mut Vec<u8>) {
        let rewritten = match (self.options.rewrite_pmt, self.reader.audio_pid()) {
            (true, Some(audio_pid)) => {
                let output_pid = self.options.output_audio_pid.unwrap_or(audio_pid);
                psi::rewrite_pmt(packet, audio_pid, output_pid)
            }
            _ => None,
        };
        match rewritten {
            Some(pmt) => {
                self.stats.pmt_rewritten += 1;
                out.extend_from_slice(&pmt);
            }
            None => {
                self.stats.passthrough_packets += 1;
                out.extend_from_slice(packet);
            }
        }
    }

    fn on_audio(&mut self, audio: AudioPacket, packet: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.stats.audio_packets_in += 1;
        let header = audio.header;

        let output_pid = self.options.output_audio_pid.unwrap_or(header.pid);
        let writer = self.writer.get_or_insert_with(|| TsWriter::new(output_pid));
        writer.set_pid(output_pid);

        if let Some(pcr) = header.pcr(packet) {
            writer.write_pcr(pcr, header.discontinuity(packet), out);
            self.stats.audio_packets_out += 1;
        }

        if audio.discontinuity {
            self.pes.reset();
            self.assembler.reset();
        }

        if let Some(offset) = audio.payload_offset {
            if let Some(fragment) = self.pes.push(header.payload_start, &packet[offset..]) {
                self.assembler
                    .push(fragment.data, fragment.pes_start, fragment.pts);
            }
        }

        self.transcode_ready(out)
    }

    /// Decode and encode every access unit the assembler can produce.
    fn transcode_ready(&mut self, out: &mut Vec<u8>) -> Result<()> {
        while let Some(au) = self.assembler.next_access_unit()? {
            self.stats.access_units += 1;

            let block = match self.decode(&au) {
                Ok(block) => block,
                Err(e) if e.is_recoverable() => match self.on_decode_error(&au, e) {
                    Some(silence) => silence,
                    None => continue,
                },
                Err(e) => return Err(e),
            };

            let frames = self.encoder.push(&block)?;
            self.write_frames(&frames, out);
        }
        Ok(())
    }

    fn decode(&mut self, au: &AccessUnit) -> Result<SampleBlock> {
        let decoder = match self.decoder.take() {
            Some(decoder) if decoder.codec() == au.codec() => decoder,
            _ => Decoder::open(au.codec(), self.config.sample_rate, self.config.channels)?,
        };
        self.decoder.insert(decoder).decode(au)
    }

    fn on_decode_error(&mut self, au: &AccessUnit, error: RemuxError) -> Option<SampleBlock> {
        self.stats.decode_errors += 1;
        warn!(
            codec = %au.codec(),
            bytes = au.data.len(),
            pts = ?au.pts,
            policy = ?self.options.decode_error_policy,
            "{}",
            error
        );
        self.last_error = Some(error.to_string());

        match self.options.decode_error_policy {
            DecodeErrorPolicy::Skip => None,
            DecodeErrorPolicy::Silence => {
                self.stats.silence_substituted += 1;
                Some(SampleBlock::silence(
                    self.config.sample_rate,
                    self.config.channels,
                    au.header.samples(),
                    au.pts,
                ))
            }
        }
    }

    fn drain_encoder(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let frames = self.encoder.flush()?;
        debug!(
            frames = frames.len(),
            total = self.encoder.frames_encoded(),
            "encoder flushed"
        );
        self.write_frames(&frames, out);
        Ok(())
    }

    fn write_frames(&mut self, frames: &[crate::transcode::EncodedFrame], out: &mut Vec<u8>) {
        if frames.is_empty() {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            // no audio packet seen yet, so no PID to write on
            warn!(frames = frames.len(), "dropping AAC frames without an audio PID");
            return;
        };
        let before = writer.packets_written();
        for frame in frames {
            writer.write_audio(&frame.data, frame.pts, out);
        }
        self.stats.aac_frames += frames.len() as u64;
        self.stats.audio_packets_out += writer.packets_written() - before;
    }
}
