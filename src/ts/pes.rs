//! PES packet headers
//!
//! Parsing on the input side (start code, stream id, optional PTS) and a
//! depacketizer that strips PES headers from an audio PID's payloads, plus
//! the builder used when emitting AAC.

use super::PTS_MASK;
use tracing::warn;

/// Stream id used for the emitted AAC track
pub const AUDIO_STREAM_ID: u8 = 0xC0;
/// Private stream 1, which carries AC-3
pub const PRIVATE_STREAM_1: u8 = 0xBD;

/// Largest possible PES header: 9 fixed bytes plus 255 bytes of header data
const MAX_HEADER_LEN: usize = 9 + 255;

/// Whether `stream_id` can carry MPEG or AC-3 audio
pub fn is_audio_stream_id(stream_id: u8) -> bool {
    (0xC0..=0xDF).contains(&stream_id) || stream_id == PRIVATE_STREAM_1
}

/// Stream ids whose PES packets have no optional header
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// `PES_packet_length`; zero means unbounded
    pub packet_length: u16,
    pub pts: Option<u64>,
    /// Bytes before the elementary stream payload
    pub header_len: usize,
}

impl PesHeader {
    /// Payload bytes declared by `packet_length`, if bounded
    pub fn payload_len(&self) -> Option<usize> {
        (self.packet_length != 0).then(|| (self.packet_length as usize + 6).saturating_sub(self.header_len))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesParse {
    Header(PesHeader),
    Incomplete,
    Invalid,
}

pub fn parse_header(data: &[u8]) -> PesParse {
    let prefix = &[0x00, 0x00, 0x01][..data.len().min(3)];
    if data[..prefix.len()] != *prefix {
        return PesParse::Invalid;
    }
    if data.len() < 6 {
        return PesParse::Incomplete;
    }
    let stream_id = data[3];
    let packet_length = u16::from_be_bytes([data[4], data[5]]);

    if !has_optional_header(stream_id) {
        return PesParse::Header(PesHeader {
            stream_id,
            packet_length,
            pts: None,
            header_len: 6,
        });
    }

    if data.len() < 9 {
        return PesParse::Incomplete;
    }
    if data[6] & 0xC0 != 0x80 {
        return PesParse::Invalid;
    }
    let pts_dts_flags = data[7] >> 6;
    let header_len = 9 + data[8] as usize;
    if data.len() < header_len {
        return PesParse::Incomplete;
    }
    let pts = if pts_dts_flags & 0x02 != 0 && header_len >= 14 {
        Some(read_timestamp(&data[9..14]))
    } else {
        None
    };

    PesParse::Header(PesHeader {
        stream_id,
        packet_length,
        pts,
        header_len,
    })
}

/// Decode a 5-byte PTS/DTS field.
pub fn read_timestamp(b: &[u8]) -> u64 {
    (((b[0] >> 1) & 0x07) as u64) << 30
        | (b[1] as u64) << 22
        | ((b[2] >> 1) as u64) << 15
        | (b[3] as u64) << 7
        | (b[4] >> 1) as u64
}

/// Encode a 5-byte PTS/DTS field with the given 4-bit prefix.
pub fn write_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    let ts = ts & PTS_MASK;
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01,
        (ts >> 22) as u8,
        (((ts >> 15) as u8) << 1) | 0x01,
        (ts >> 7) as u8,
        ((ts as u8) << 1) | 0x01,
    ]
}

/// Build one audio PES packet around `payload`.
pub fn build(stream_id: u8, payload: &[u8], pts: Option<u64>) -> Vec<u8> {
    let header_data_len = if pts.is_some() { 5 } else { 0 };
    let mut pes = Vec::with_capacity(9 + header_data_len + payload.len());
    pes.extend_from_slice(&[0x00, 0x00, 0x01, stream_id]);

    let length = 3 + header_data_len + payload.len();
    // zero marks an unbounded packet when the length does not fit
    let length = u16::try_from(length).unwrap_or(0);
    pes.extend_from_slice(&length.to_be_bytes());

    // '10', not scrambled, data_alignment_indicator set
    pes.push(0x84);
    match pts {
        Some(pts) => {
            pes.push(0x80);
            pes.push(5);
            pes.extend_from_slice(&write_timestamp(0x02, pts));
        }
        None => {
            pes.push(0x00);
            pes.push(0);
        }
    }
    pes.extend_from_slice(payload);
    pes
}

/// Elementary stream bytes recovered from one TS payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsFragment<'a> {
    /// First payload bytes of a PES packet
    pub pes_start: bool,
    pub pts: Option<u64>,
    pub data: &'a [u8],
}

/// Strips PES headers from consecutive payloads of one PID
#[derive(Debug, Default)]
pub struct PesDepacketizer {
    header: Vec<u8>,
    awaiting_header: bool,
    in_pes: bool,
    /// Payload bytes left in a bounded PES packet
    remaining: Option<usize>,
}

impl PesDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one TS payload; returns the elementary stream bytes it carries.
    pub fn push<'a>(&mut self, payload_start: bool, payload: &'a [u8]) -> Option<EsFragment<'a>> {
        if payload_start {
            if self.awaiting_header || self.remaining.is_some_and(|r| r > 0) {
                warn!("PES packet ended early");
            }
            self.header.clear();
            self.awaiting_header = true;
            self.in_pes = false;
            self.remaining = None;
        }

        if self.awaiting_header {
            let buffered = self.header.len();
            let take = payload.len().min(MAX_HEADER_LEN - buffered);
            self.header.extend_from_slice(&payload[..take]);

            return match parse_header(&self.header) {
                PesParse::Incomplete if self.header.len() < MAX_HEADER_LEN => None,
                PesParse::Header(h) => {
                    self.awaiting_header = false;
                    self.in_pes = true;
                    self.header.clear();
                    self.remaining = h.payload_len();
                    let data = self.bounded(&payload[h.header_len - buffered..]);
                    Some(EsFragment {
                        pes_start: true,
                        pts: h.pts,
                        data,
                    })
                }
                _ => {
                    warn!("invalid PES header, dropping until next packet start");
                    self.reset();
                    None
                }
            };
        }

        if !self.in_pes {
            return None;
        }
        Some(EsFragment {
            pes_start: false,
            pts: None,
            data: self.bounded(payload),
        })
    }

    /// Forget any partial PES packet.
    pub fn reset(&mut self) {
        self.header.clear();
        self.awaiting_header = false;
        self.in_pes = false;
        self.remaining = None;
    }

    fn bounded<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        match self.remaining {
            Some(remaining) => {
                let n = remaining.min(data.len());
                self.remaining = Some(remaining - n);
                &data[..n]
            }
            None => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip_and_wrap() {
        for ts in [0u64, 90_000, 0x1_2345_6789, PTS_MASK] {
            assert_eq!(read_timestamp(&write_timestamp(0x02, ts)), ts);
        }
        assert_eq!(read_timestamp(&write_timestamp(0x02, PTS_MASK + 5)), 4);
        assert_eq!(write_timestamp(0x02, 0)[0], 0x21);
    }

    #[test]
    fn test_build_and_parse() {
        let pes = build(AUDIO_STREAM_ID, &[0xAA; 100], Some(123_456));
        assert_eq!(pes.len(), 14 + 100);
        match parse_header(&pes) {
            PesParse::Header(h) => {
                assert_eq!(h.stream_id, AUDIO_STREAM_ID);
                assert_eq!(h.pts, Some(123_456));
                assert_eq!(h.header_len, 14);
                assert_eq!(h.payload_len(), Some(100));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_build_without_pts() {
        let pes = build(AUDIO_STREAM_ID, &[1, 2, 3], None);
        assert_eq!(pes.len(), 12);
        assert!(matches!(
            parse_header(&pes),
            PesParse::Header(PesHeader { pts: None, header_len: 9, .. })
        ));
    }

    #[test]
    fn test_parse_incomplete_and_invalid() {
        assert_eq!(parse_header(&[0x00, 0x00]), PesParse::Incomplete);
        assert_eq!(parse_header(&[0x00, 0x00, 0x01, 0xC0, 0x00]), PesParse::Incomplete);
        assert_eq!(parse_header(&[0x00, 0x01, 0x01]), PesParse::Invalid);
        assert_eq!(
            parse_header(&[0x00, 0x00, 0x01, 0xC0, 0, 0, 0x40, 0, 0]),
            PesParse::Invalid
        );
    }

    #[test]
    fn test_audio_stream_ids() {
        assert!(is_audio_stream_id(0xC0));
        assert!(is_audio_stream_id(0xDF));
        assert!(is_audio_stream_id(0xBD));
        assert!(!is_audio_stream_id(0xE0));
    }

    #[test]
    fn test_depacketizer_bounded_pes() {
        let pes = build(AUDIO_STREAM_ID, &[7u8; 300], Some(900));
        let mut depack = PesDepacketizer::new();

        let first = depack.push(true, &pes[..184]).unwrap();
        assert!(first.pes_start);
        assert_eq!(first.pts, Some(900));
        assert_eq!(first.data.len(), 184 - 14);

        // trailing stuffing past the declared length is ignored
        let mut tail = pes[184..].to_vec();
        tail.extend_from_slice(&[0xFF; 20]);
        let second = depack.push(false, &tail).unwrap();
        assert!(!second.pes_start);
        assert_eq!(second.data.len(), 300 - 170);
    }

    #[test]
    fn test_depacketizer_header_split_across_packets() {
        let pes = build(AUDIO_STREAM_ID, &[9u8; 50], Some(4500));
        let mut depack = PesDepacketizer::new();
        assert!(depack.push(true, &pes[..8]).is_none());
        let frag = depack.push(false, &pes[8..]).unwrap();
        assert!(frag.pes_start);
        assert_eq!(frag.pts, Some(4500));
        assert_eq!(frag.data, &[9u8; 50][..]);
    }

    #[test]
    fn test_depacketizer_ignores_continuation_without_start() {
        let mut depack = PesDepacketizer::new();
        assert!(depack.push(false, &[1, 2, 3]).is_none());
        assert!(depack.push(true, &[0x12, 0x34, 0x56, 0x78]).is_none());
        assert!(depack.push(false, &[1, 2, 3]).is_none());
    }
}
