//! Transport stream reader
//!
//! Turns arbitrarily chunked input into aligned 188-byte packets and labels
//! each one. Bytes that do not yet form a whole packet stay buffered until
//! the next call, so the packet sequence never depends on how the host
//! slices its input.

use super::{pes, psi, TsHeader, PAT_PID, TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::config::RemuxOptions;
use crate::error::{RemuxError, Result};
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, info, warn};

/// What the session should do with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Copy to the output unchanged
    Passthrough,
    /// PMT of the program carrying the audio track
    Pmt,
    /// Payload of the audio track
    Audio(AudioPacket),
    /// Audio PID packet that carries nothing usable
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacket {
    pub header: TsHeader,
    /// Start of the payload, if the packet has one
    pub payload_offset: Option<usize>,
    /// Continuity counter jumped since the previous audio packet
    pub discontinuity: bool,
}

enum Candidate {
    Confirmed(usize),
    /// Sync byte at this offset, confirmation not yet buffered
    Pending(usize),
    None,
}

pub struct TsReader {
    residual: BytesMut,
    in_sync: bool,
    /// Bytes discarded since sync was lost
    scanned: usize,
    scan_window: usize,

    pmt_pid: Option<u16>,
    /// Elementary PIDs listed by the last PMT
    mapped_pids: Vec<u16>,
    audio_pid: Option<u16>,
    pinned: bool,
    fallback_after: u64,
    last_continuity: Option<u8>,

    packets: u64,
    resyncs: u64,
    continuity_errors: u64,
}

impl TsReader {
    pub fn new(options: &RemuxOptions) -> Self {
        Self {
            residual: BytesMut::new(),
            in_sync: true,
            scanned: 0,
            scan_window: options.sync_scan_window,
            pmt_pid: None,
            mapped_pids: Vec::new(),
            audio_pid: options.audio_pid,
            pinned: options.audio_pid.is_some(),
            fallback_after: options.fallback_after_packets,
            last_continuity: None,
            packets: 0,
            resyncs: 0,
            continuity_errors: 0,
        }
    }

    /// Append input after whatever is still buffered.
    pub fn feed(&mut self, input: &[u8]) {
        self.residual.extend_from_slice(input);
    }

    /// Bytes buffered but not yet returned as packets
    pub fn residual(&self) -> usize {
        self.residual.len()
    }

    pub fn audio_pid(&self) -> Option<u16> {
        self.audio_pid
    }

    /// Whether `pid` already carries something other than the audio track:
    /// PAT, PMT or another stream of the program.
    pub fn pid_in_use(&self, pid: u16) -> bool {
        if Some(pid) == self.audio_pid {
            return false;
        }
        pid == PAT_PID || Some(pid) == self.pmt_pid || self.mapped_pids.contains(&pid)
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn continuity_errors(&self) -> u64 {
        self.continuity_errors
    }

    /// Next aligned packet, or `None` when only a partial packet is left.
    ///
    /// Fails with `Desync` once more than the scan window has been discarded
    /// without finding two sync bytes one packet apart. The discarded bytes
    /// are gone; the next call scans a fresh window.
    pub fn next_packet(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.residual.is_empty() {
                return Ok(None);
            }

            if self.in_sync {
                if self.residual[0] == TS_SYNC_BYTE {
                    if self.residual.len() < TS_PACKET_SIZE {
                        return Ok(None);
                    }
                    self.packets += 1;
                    return Ok(Some(self.residual.split_to(TS_PACKET_SIZE).freeze()));
                }
                warn!(packets = self.packets, "transport stream sync lost");
                self.in_sync = false;
                self.resyncs += 1;
            }

            let (discard, found) = match self.find_candidate() {
                Candidate::Confirmed(pos) => (pos, true),
                Candidate::Pending(pos) => (pos, false),
                Candidate::None => (self.residual.len(), false),
            };
            self.residual.advance(discard);
            self.scanned += discard;

            if self.scanned > self.scan_window {
                let scanned = self.scanned;
                self.scanned = 0;
                return Err(RemuxError::Desync { scanned });
            }
            if !found {
                return Ok(None);
            }

            debug!(skipped = self.scanned, "transport stream sync acquired");
            self.in_sync = true;
            self.scanned = 0;
        }
    }

    fn find_candidate(&self) -> Candidate {
        let buf = &self.residual[..];
        for (pos, byte) in buf.iter().enumerate() {
            if *byte != TS_SYNC_BYTE {
                continue;
            }
            match buf.get(pos + TS_PACKET_SIZE) {
                Some(&TS_SYNC_BYTE) => return Candidate::Confirmed(pos),
                Some(_) => continue,
                None => return Candidate::Pending(pos),
            }
        }
        Candidate::None
    }

    /// Label a packet returned by [`next_packet`](Self::next_packet),
    /// updating PSI state as tables go by.
    pub fn classify(&mut self, packet: &[u8]) -> PacketKind {
        let Some(header) = TsHeader::parse(packet) else {
            return PacketKind::Passthrough;
        };

        if header.pid == PAT_PID {
            self.on_pat(&header, packet);
            return PacketKind::Passthrough;
        }

        if Some(header.pid) == self.pmt_pid {
            self.on_pmt(&header, packet);
            return PacketKind::Pmt;
        }

        if self.audio_pid.is_none() && self.packets >= self.fallback_after {
            self.try_fallback(&header, packet);
        }

        if Some(header.pid) == self.audio_pid {
            return self.on_audio(header, packet);
        }

        PacketKind::Passthrough
    }

    fn on_pat(&mut self, header: &TsHeader, packet: &[u8]) {
        if !header.payload_start {
            return;
        }
        let Some(offset) = header.payload_offset(packet) else {
            return;
        };
        if let Some(pmt_pid) = psi::parse_pat(&packet[offset..]) {
            if self.pmt_pid != Some(pmt_pid) {
                debug!(pmt_pid, "PAT parsed");
                self.pmt_pid = Some(pmt_pid);
            }
        }
    }

    fn on_pmt(&mut self, header: &TsHeader, packet: &[u8]) {
        if !header.payload_start {
            return;
        }
        let Some(offset) = header.payload_offset(packet) else {
            return;
        };
        let Some(streams) = psi::parse_pmt(&packet[offset..]) else {
            return;
        };
        self.mapped_pids = streams.iter().map(|s| s.pid).collect();

        if self.pinned {
            return;
        }
        match psi::find_audio(&streams) {
            Some((pid, codec)) if self.audio_pid != Some(pid) => {
                info!(audio_pid = pid, codec = %codec, "audio track found in PMT");
                self.audio_pid = Some(pid);
                self.last_continuity = None;
            }
            Some(_) => {}
            None if self.audio_pid.is_none() => {
                debug!(streams = streams.len(), "PMT lists no MP2 or AC-3 track");
            }
            None => {}
        }
    }

    /// Adopt an audio PES on a PID no PMT has claimed. Streams the PMT maps
    /// (AAC, E-AC-3, subtitles) stay passthrough.
    fn try_fallback(&mut self, header: &TsHeader, packet: &[u8]) {
        if !header.payload_start || self.pid_in_use(header.pid) {
            return;
        }
        let Some(offset) = header.payload_offset(packet) else {
            return;
        };
        if let pes::PesParse::Header(pes) = pes::parse_header(&packet[offset..]) {
            if pes::is_audio_stream_id(pes.stream_id) {
                warn!(
                    audio_pid = header.pid,
                    stream_id = pes.stream_id,
                    "no audio track announced, adopting first audio PES"
                );
                self.audio_pid = Some(header.pid);
            }
        }
    }

    fn on_audio(&mut self, header: TsHeader, packet: &[u8]) -> PacketKind {
        if header.transport_error {
            warn!(pid = header.pid, "dropping audio packet with transport error");
            return PacketKind::Dropped;
        }
        if header.scrambling != 0 {
            warn!(pid = header.pid, "dropping scrambled audio packet");
            return PacketKind::Dropped;
        }

        let payload_offset = header.payload_offset(packet);
        let mut discontinuity = false;
        if payload_offset.is_some() {
            if let Some(last) = self.last_continuity {
                let expected = (last + 1) & 0x0F;
                if header.continuity == last {
                    debug!(pid = header.pid, "dropping duplicate audio packet");
                    return PacketKind::Dropped;
                }
                if header.continuity != expected && !header.discontinuity(packet) {
                    warn!(
                        pid = header.pid,
                        expected,
                        found = header.continuity,
                        "audio continuity gap"
                    );
                    self.continuity_errors += 1;
                    discontinuity = true;
                }
            }
            self.last_continuity = Some(header.continuity);
        }

        PacketKind::Audio(AudioPacket {
            header,
            payload_offset,
            discontinuity,
        })
    }
}
