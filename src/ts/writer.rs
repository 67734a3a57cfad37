//! Output packetizer
//!
//! Wraps encoded AAC frames into PES packets and splits them over 188-byte
//! transport packets on the output audio PID, keeping that PID's continuity
//! counter.

use super::{pes, AF_DISCONTINUITY, AF_PCR, TS_HEADER_SIZE, TS_PACKET_SIZE, TS_SYNC_BYTE};

const MAX_PAYLOAD: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;

pub struct TsWriter {
    pid: u16,
    continuity: u8,
    /// No payload packet written yet on this PID
    fresh: bool,
    packets_written: u64,
}

impl TsWriter {
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            continuity: 0,
            fresh: true,
            packets_written: 0,
        }
    }

    pub fn set_pid(&mut self, pid: u16) {
        if pid != self.pid {
            self.pid = pid;
            self.continuity = 0;
            self.fresh = true;
        }
    }

    /// Audio packets produced so far
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Emit one encoded frame as a PES packet.
    pub fn write_audio(&mut self, frame: &[u8], pts: Option<u64>, out: &mut Vec<u8>) {
        let pes = pes::build(pes::AUDIO_STREAM_ID, frame, pts);
        let mut rest = &pes[..];
        let mut first = true;

        while !rest.is_empty() {
            let take = rest.len().min(MAX_PAYLOAD);
            let start = out.len();
            out.push(TS_SYNC_BYTE);
            out.push(if first { 0x40 } else { 0x00 } | ((self.pid >> 8) as u8 & 0x1F));
            out.push(self.pid as u8);

            if take < MAX_PAYLOAD {
                // stuff the last packet through its adaptation field
                let af_len = MAX_PAYLOAD - 1 - take;
                out.push(0x30 | self.continuity);
                out.push(af_len as u8);
                if af_len > 0 {
                    out.push(0x00);
                    out.resize(out.len() + af_len - 1, 0xFF);
                }
            } else {
                out.push(0x10 | self.continuity);
            }

            out.extend_from_slice(&rest[..take]);
            debug_assert_eq!(out.len() - start, TS_PACKET_SIZE);

            rest = &rest[take..];
            first = false;
            self.fresh = false;
            self.continuity = (self.continuity + 1) & 0x0F;
            self.packets_written += 1;
        }
    }

    /// Re-emit a PCR as an adaptation-only packet on the output PID.
    ///
    /// Adaptation-only packets do not advance the continuity counter; they
    /// repeat the value of the last payload packet.
    pub fn write_pcr(&mut self, pcr: &[u8], discontinuity: bool, out: &mut Vec<u8>) {
        let cc = if self.fresh {
            0x0F
        } else {
            self.continuity.wrapping_sub(1) & 0x0F
        };
        out.push(TS_SYNC_BYTE);
        out.push((self.pid >> 8) as u8 & 0x1F);
        out.push(self.pid as u8);
        out.push(0x20 | cc);
        out.push((TS_PACKET_SIZE - TS_HEADER_SIZE - 1) as u8);
        out.push(AF_PCR | if discontinuity { AF_DISCONTINUITY } else { 0 });
        out.extend_from_slice(&pcr[..6]);
        out.resize(out.len() + TS_PACKET_SIZE - TS_HEADER_SIZE - 2 - 6, 0xFF);
        self.packets_written += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::pes::PesParse;
    use crate::ts::TsHeader;

    #[test]
    fn test_single_packet_frame_is_stuffed() {
        let mut writer = TsWriter::new(0x101);
        let mut out = Vec::new();
        writer.write_audio(&[0xAB; 100], Some(90_000), &mut out);
        assert_eq!(out.len(), TS_PACKET_SIZE);

        let h = TsHeader::parse(&out).unwrap();
        assert!(h.payload_start);
        assert_eq!(h.pid, 0x101);
        assert_eq!(h.continuity, 0);
        let offset = h.payload_offset(&out).unwrap();
        assert_eq!(TS_PACKET_SIZE - offset, 114);
        match pes::parse_header(&out[offset..]) {
            PesParse::Header(p) => assert_eq!(p.pts, Some(90_000)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_multi_packet_frame_and_continuity() {
        let mut writer = TsWriter::new(0x101);
        let mut out = Vec::new();
        writer.write_audio(&[0x11; 500], None, &mut out);
        writer.write_audio(&[0x22; 500], None, &mut out);
        assert_eq!(out.len() % TS_PACKET_SIZE, 0);

        let headers: Vec<TsHeader> = out
            .chunks(TS_PACKET_SIZE)
            .map(|p| TsHeader::parse(p).unwrap())
            .collect();
        assert_eq!(headers.len(), 6);
        for (i, h) in headers.iter().enumerate() {
            assert_eq!(h.continuity, i as u8);
            assert_eq!(h.payload_start, i % 3 == 0);
        }
        assert_eq!(writer.packets_written(), 6);
    }

    #[test]
    fn test_exact_fit_uses_empty_adaptation() {
        let mut writer = TsWriter::new(0x101);
        let mut out = Vec::new();
        // 9 header bytes + 174 payload bytes leaves 183 bytes in one packet
        writer.write_audio(&[0x33; 174], None, &mut out);
        assert_eq!(out.len(), TS_PACKET_SIZE);
        assert_eq!(out[3] & 0x30, 0x30);
        assert_eq!(out[4], 0);
    }

    #[test]
    fn test_pcr_packet_repeats_continuity() {
        let mut writer = TsWriter::new(0x101);
        let mut out = Vec::new();
        writer.write_audio(&[0x44; 10], None, &mut out);
        writer.write_pcr(&[1, 2, 3, 4, 5, 6], false, &mut out);
        assert_eq!(out.len(), 2 * TS_PACKET_SIZE);

        let pcr_packet = &out[TS_PACKET_SIZE..];
        let h = TsHeader::parse(pcr_packet).unwrap();
        assert!(!h.has_payload);
        assert_eq!(h.continuity, 0);
        assert_eq!(h.pcr(pcr_packet), Some(&[1u8, 2, 3, 4, 5, 6][..]));
    }
}
