//! MP2 and AC-3 frame headers

use super::Codec;

/// Parameters decoded from one frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub codec: Codec,
    pub sample_rate: u32,
    pub channels: u16,
    /// Total frame length in bytes, header included
    pub frame_len: usize,
    /// Bitrate in bps
    pub bitrate: u32,
}

impl FrameHeader {
    /// Samples per channel carried by the frame
    pub fn samples(&self) -> usize {
        self.codec.samples_per_frame()
    }

    /// Whether `other` describes a frame of the same stream
    pub fn same_stream(&self, other: &FrameHeader) -> bool {
        self.codec == other.codec
            && self.sample_rate == other.sample_rate
            && self.channels == other.channels
    }
}

/// Outcome of looking for a header at the start of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Header(FrameHeader),
    /// The bytes so far are a valid header prefix
    NeedMore,
    Invalid,
}

/// Look for a header of either codec.
pub fn probe(data: &[u8]) -> Probe {
    match data.first() {
        Some(0xFF) => parse_mp2(data),
        Some(0x0B) => parse_ac3(data),
        Some(_) => Probe::Invalid,
        None => Probe::NeedMore,
    }
}

/// Look for a header of one codec only.
pub fn probe_codec(codec: Codec, data: &[u8]) -> Probe {
    match codec {
        Codec::Mp2 => parse_mp2(data),
        Codec::Ac3 => parse_ac3(data),
    }
}

// ── MPEG audio Layer II ─────────────────────────────────────────────────────

const MP2_HEADER_LEN: usize = 4;

/// kbps, MPEG-1 Layer II
const MP2_BITRATES_V1: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];
/// kbps, MPEG-2/2.5 Layer II (low sampling frequencies)
const MP2_BITRATES_LSF: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

pub fn parse_mp2(data: &[u8]) -> Probe {
    if data.is_empty() {
        return Probe::NeedMore;
    }
    if data[0] != 0xFF {
        return Probe::Invalid;
    }
    if data.len() < 2 {
        return Probe::NeedMore;
    }
    if data[1] & 0xE0 != 0xE0 {
        return Probe::Invalid;
    }
    let version = (data[1] >> 3) & 0x03;
    let layer = (data[1] >> 1) & 0x03;
    // version 1 is reserved; layer bits 0b10 are Layer II
    if version == 1 || layer != 2 {
        return Probe::Invalid;
    }
    if data.len() < MP2_HEADER_LEN {
        return Probe::NeedMore;
    }

    let bitrate_index = (data[2] >> 4) as usize;
    let rate_index = ((data[2] >> 2) & 0x03) as usize;
    let padding = ((data[2] >> 1) & 0x01) as usize;
    let mode = data[3] >> 6;

    // free format (0) and the bad index (15) cannot be framed
    if bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
        return Probe::Invalid;
    }

    let (bitrate_kbps, sample_rate) = match version {
        3 => (
            MP2_BITRATES_V1[bitrate_index],
            [44100, 48000, 32000][rate_index],
        ),
        2 => (
            MP2_BITRATES_LSF[bitrate_index],
            [22050, 24000, 16000][rate_index],
        ),
        _ => (
            MP2_BITRATES_LSF[bitrate_index],
            [11025, 12000, 8000][rate_index],
        ),
    };
    let bitrate = bitrate_kbps * 1000;
    let frame_len = (144 * bitrate / sample_rate) as usize + padding;

    Probe::Header(FrameHeader {
        codec: Codec::Mp2,
        sample_rate,
        channels: if mode == 3 { 1 } else { 2 },
        frame_len,
        bitrate,
    })
}

// ── AC-3 ────────────────────────────────────────────────────────────────────

const AC3_HEADER_LEN: usize = 8;

/// Frame sizes in 16-bit words, indexed by frmsizecod, per fscod
const AC3_FRAME_WORDS: [[u16; 38]; 3] = [
    // 48 kHz
    [
        64, 64, 80, 80, 96, 96, 112, 112, 128, 128, 160, 160, 192, 192, 224, 224, 256, 256, 320,
        320, 384, 384, 448, 448, 512, 512, 640, 640, 768, 768, 896, 896, 1024, 1024, 1152, 1152,
        1280, 1280,
    ],
    // 44.1 kHz
    [
        69, 70, 87, 88, 104, 105, 121, 122, 139, 140, 174, 175, 208, 209, 243, 244, 278, 279, 348,
        349, 417, 418, 487, 488, 557, 558, 696, 697, 835, 836, 975, 976, 1114, 1115, 1253, 1254,
        1393, 1394,
    ],
    // 32 kHz
    [
        96, 96, 120, 120, 144, 144, 168, 168, 192, 192, 240, 240, 288, 288, 336, 336, 384, 384,
        480, 480, 576, 576, 672, 672, 768, 768, 960, 960, 1152, 1152, 1344, 1344, 1536, 1536,
        1728, 1728, 1920, 1920,
    ],
];

const AC3_SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];

/// kbps, indexed by frmsizecod / 2
const AC3_BITRATES: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];

/// Full-bandwidth channels per acmod (acmod 0 is dual mono)
const AC3_CHANNELS: [u16; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

pub fn parse_ac3(data: &[u8]) -> Probe {
    if data.is_empty() {
        return Probe::NeedMore;
    }
    if data[0] != 0x0B {
        return Probe::Invalid;
    }
    if data.len() < 2 {
        return Probe::NeedMore;
    }
    if data[1] != 0x77 {
        return Probe::Invalid;
    }
    if data.len() < AC3_HEADER_LEN {
        return Probe::NeedMore;
    }

    let fscod = (data[4] >> 6) as usize;
    let frmsizecod = (data[4] & 0x3F) as usize;
    let bsid = data[5] >> 3;
    // bsid above 8 is E-AC-3 or a future syntax
    if fscod == 3 || frmsizecod >= 38 || bsid > 8 {
        return Probe::Invalid;
    }

    let acmod = data[6] >> 5;
    // lfeon follows acmod and the optional 2-bit mix level fields
    let mut bit = 3;
    if acmod & 0x01 != 0 && acmod != 1 {
        bit += 2; // cmixlev
    }
    if acmod & 0x04 != 0 {
        bit += 2; // surmixlev
    }
    if acmod == 2 {
        bit += 2; // dsurmod
    }
    let bits = u16::from_be_bytes([data[6], data[7]]);
    let lfeon = (bits >> (15 - bit)) & 0x01;

    Probe::Header(FrameHeader {
        codec: Codec::Ac3,
        sample_rate: AC3_SAMPLE_RATES[fscod],
        channels: AC3_CHANNELS[acmod as usize] + lfeon,
        frame_len: AC3_FRAME_WORDS[fscod][frmsizecod] as usize * 2,
        bitrate: AC3_BITRATES[frmsizecod / 2] * 1000,
    })
}
