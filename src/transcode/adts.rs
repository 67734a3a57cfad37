//! ADTS framing for raw AAC-LC frames

/// Bytes in an ADTS header without CRC
pub const ADTS_HEADER_LEN: usize = 7;
/// Largest frame length the 13-bit ADTS field can express
pub const MAX_ADTS_FRAME_LEN: usize = (1 << 13) - 1;
/// MPEG-4 audio object type for AAC-LC
const AOT_AAC_LC: u8 = 2;

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// ADTS sampling frequency index for `rate`
pub fn sample_rate_index(rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|r| *r == rate).map(|i| i as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub rate_index: u8,
    pub channel_config: u8,
}

impl AdtsHeader {
    pub fn new(sample_rate: u32, channels: u16) -> Option<Self> {
        if !(1..=7).contains(&channels) {
            return None;
        }
        Some(Self {
            rate_index: sample_rate_index(sample_rate)?,
            channel_config: channels as u8,
        })
    }

    /// Header for a frame carrying `payload_len` bytes of raw AAC.
    pub fn write(&self, payload_len: usize) -> Option<[u8; ADTS_HEADER_LEN]> {
        let len = payload_len + ADTS_HEADER_LEN;
        if len > MAX_ADTS_FRAME_LEN {
            return None;
        }
        let ch = self.channel_config;
        Some([
            0xFF,
            // MPEG-4, layer 0, no CRC
            0xF1,
            ((AOT_AAC_LC - 1) << 6) | (self.rate_index << 2) | (ch >> 2),
            ((ch & 0x03) << 6) | (len >> 11) as u8,
            (len >> 3) as u8,
            (((len & 0x07) as u8) << 5) | 0x1F,
            // buffer fullness 0x7FF (VBR), one raw data block
            0xFC,
        ])
    }

    /// Parse a header; returns it with the total frame length.
    pub fn parse(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < ADTS_HEADER_LEN || data[0] != 0xFF || data[1] & 0xF6 != 0xF0 {
            return None;
        }
        let rate_index = (data[2] >> 2) & 0x0F;
        let channel_config = ((data[2] & 0x01) << 2) | (data[3] >> 6);
        let len = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] >> 5) as usize);
        Some((
            Self {
                rate_index,
                channel_config,
            },
            len,
        ))
    }
}
