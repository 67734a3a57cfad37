//! Access unit assembly
//!
//! PES payload bytes arrive in arbitrary fragments. The assembler buffers
//! them, locks onto the first valid MP2 or AC-3 header, and hands out one
//! complete frame at a time together with the PES timestamp that belongs to
//! it.

use super::header::{self, Probe};
use super::{AccessUnit, Codec};
use crate::error::{RemuxError, Result};
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

enum Boundary {
    /// No pending PES boundary inside the current frame
    Clear,
    /// Not enough bytes past the boundary to tell yet
    Undecided,
    Truncated(AccessUnit),
}

pub struct FrameAssembler {
    buffer: BytesMut,
    /// Elementary stream offset of `buffer[0]`
    base_offset: u64,
    /// PES timestamps keyed by the stream offset where their payload began
    pts_marks: VecDeque<(u64, u64)>,
    /// Stream offset where a PES started while a frame was still open
    pes_boundary: Option<u64>,
    codec: Option<Codec>,
    synced: bool,
    max_access_unit: usize,
    skipped_bytes: u64,
}

impl FrameAssembler {
    pub fn new(max_access_unit: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            base_offset: 0,
            pts_marks: VecDeque::new(),
            pes_boundary: None,
            codec: None,
            synced: false,
            max_access_unit,
            skipped_bytes: 0,
        }
    }

    /// Codec locked by the first valid header
    pub fn codec(&self) -> Option<Codec> {
        self.codec
    }

    /// Bytes buffered towards the next access unit
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes discarded while hunting for a frame header
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Append elementary stream bytes.
    ///
    /// `pes_start` marks the first payload bytes of a PES packet, `pts` its
    /// timestamp. A frame left unfinished when a new PES starts with a header
    /// of the same stream is handed out as a truncated unit.
    pub fn push(&mut self, data: &[u8], pes_start: bool, pts: Option<u64>) {
        let offset = self.base_offset + self.buffer.len() as u64;
        if pes_start && !self.buffer.is_empty() && self.synced && self.pes_boundary.is_none() {
            self.pes_boundary = Some(offset);
        }
        if let Some(pts) = pts {
            self.pts_marks.push_back((offset, pts));
        }
        self.buffer.extend_from_slice(data);
    }

    /// Next complete access unit, or `None` until more bytes arrive.
    pub fn next_access_unit(&mut self) -> Result<Option<AccessUnit>> {
        match self.check_boundary() {
            Boundary::Truncated(au) => return Ok(Some(au)),
            Boundary::Undecided => return Ok(None),
            Boundary::Clear => {}
        }

        loop {
            if self.buffer.is_empty() {
                return Ok(None);
            }

            let probe = match (self.codec, self.synced) {
                // Only the locked codec may resynchronize the stream
                (Some(codec), false) => header::probe_codec(codec, &self.buffer),
                _ => header::probe(&self.buffer),
            };

            let header = match probe {
                Probe::NeedMore => return Ok(None),
                Probe::Invalid => {
                    if self.synced {
                        warn!(
                            offset = self.base_offset,
                            "audio frame sync lost, scanning for next header"
                        );
                        self.synced = false;
                    }
                    self.skip(1);
                    continue;
                }
                Probe::Header(header) => header,
            };

            if let Some(locked) = self.codec {
                if locked != header.codec {
                    self.skip(1);
                    self.synced = false;
                    return Err(RemuxError::CodecMismatch {
                        locked,
                        found: header.codec,
                    });
                }
            }

            if header.frame_len > self.max_access_unit {
                self.skip(1);
                self.synced = false;
                return Err(RemuxError::FrameTooLarge {
                    codec: header.codec,
                    declared: header.frame_len,
                    limit: self.max_access_unit,
                });
            }

            if self.buffer.len() < header.frame_len {
                return Ok(None);
            }

            if self.codec.is_none() {
                info!(
                    codec = %header.codec,
                    sample_rate = header.sample_rate,
                    channels = header.channels,
                    bitrate = header.bitrate,
                    "audio stream locked"
                );
                self.codec = Some(header.codec);
            }
            if !self.synced && self.skipped_bytes > 0 {
                debug!(offset = self.base_offset, "audio frame sync acquired");
            }
            self.synced = true;

            let start = self.base_offset;
            let data = self.buffer.split_to(header.frame_len).freeze();
            self.base_offset += header.frame_len as u64;
            let pts = self.take_pts(start);

            return Ok(Some(AccessUnit { header, data, pts }));
        }
    }

    /// Drop buffered bytes and timestamps; the codec lock survives.
    pub fn reset(&mut self) {
        self.base_offset += self.buffer.len() as u64;
        self.buffer.clear();
        self.pts_marks.clear();
        self.pes_boundary = None;
        self.synced = false;
    }

    /// Decide whether the frame at the head of the buffer was cut short by
    /// the PES that began at `pes_boundary`. That takes a header of the same
    /// stream right at the boundary, so the call waits until enough bytes
    /// past it have arrived.
    fn check_boundary(&mut self) -> Boundary {
        let (Some(boundary), Some(codec)) = (self.pes_boundary, self.codec) else {
            return Boundary::Clear;
        };
        if boundary <= self.base_offset {
            self.pes_boundary = None;
            return Boundary::Clear;
        }
        let have = (boundary - self.base_offset) as usize;

        let partial = match header::probe_codec(codec, &self.buffer) {
            Probe::Header(partial) => partial,
            Probe::NeedMore => return Boundary::Undecided,
            Probe::Invalid => {
                self.pes_boundary = None;
                return Boundary::Clear;
            }
        };
        // frames that end before the boundary come out the normal way
        if partial.frame_len <= have {
            return Boundary::Clear;
        }

        match header::probe_codec(codec, &self.buffer[have..]) {
            Probe::NeedMore => return Boundary::Undecided,
            Probe::Header(following) if partial.same_stream(&following) => {}
            _ => {
                self.pes_boundary = None;
                return Boundary::Clear;
            }
        }

        debug!(
            have,
            declared = partial.frame_len,
            "frame cut short by next PES packet"
        );
        self.pes_boundary = None;
        let start = self.base_offset;
        let data = self.buffer.split_to(have).freeze();
        self.base_offset += have as u64;
        let pts = self.take_pts(start);
        Boundary::Truncated(AccessUnit {
            header: partial,
            data,
            pts,
        })
    }

    /// Timestamp for a unit starting at `start`: the newest mark at or
    /// before it. Marks past `start` stay for later units.
    fn take_pts(&mut self, start: u64) -> Option<u64> {
        let mut pts = None;
        while let Some(&(offset, value)) = self.pts_marks.front() {
            if offset > start {
                break;
            }
            pts = Some(value);
            self.pts_marks.pop_front();
        }
        pts
    }

    fn skip(&mut self, n: usize) {
        self.buffer.advance(n);
        self.base_offset += n as u64;
        self.skipped_bytes += n as u64;
    }
}
