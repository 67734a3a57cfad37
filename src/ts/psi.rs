//! Program specific information: PAT and PMT
//!
//! Only single-packet sections are interpreted; that covers the PAT and PMT
//! of every single-program stream the remuxer is meant for.

use super::{TsHeader, TS_PACKET_SIZE};
use crate::audio::Codec;

pub const PAT_TABLE_ID: u8 = 0x00;
pub const PMT_TABLE_ID: u8 = 0x02;

pub const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
pub const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
pub const STREAM_TYPE_PRIVATE_PES: u8 = 0x06;
pub const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;
pub const STREAM_TYPE_AC3: u8 = 0x81;

/// Descriptor tags that announce AC-3 inside a private PES stream
const AC3_DESCRIPTOR_TAGS: &[u8] = &[0x6A, 0x81];

const CRC_MPEG2: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_MPEG_2);

/// CRC32/MPEG-2 as carried at the end of every PSI section
pub fn crc32(data: &[u8]) -> u32 {
    CRC_MPEG2.checksum(data)
}

/// Locate the section in a PSI payload: returns its offset within
/// `payload` and its full length (header and CRC included).
fn section_bounds(payload: &[u8]) -> Option<(usize, usize)> {
    let pointer = *payload.first()? as usize;
    let start = 1 + pointer;
    let header = payload.get(start..start + 3)?;
    let section_length = (((header[1] & 0x0F) as usize) << 8) | header[2] as usize;
    let len = 3 + section_length;
    // table header (8) plus CRC (4)
    if section_length < 9 || start + len > payload.len() {
        return None;
    }
    Some((start, len))
}

fn section(payload: &[u8], table_id: u8) -> Option<&[u8]> {
    let (start, len) = section_bounds(payload)?;
    let section = &payload[start..start + len];
    if section[0] != table_id {
        return None;
    }
    Some(section)
}

/// PMT PID of the first program listed in a PAT payload.
pub fn parse_pat(payload: &[u8]) -> Option<u16> {
    let section = section(payload, PAT_TABLE_ID)?;
    let programs = &section[8..section.len() - 4];
    programs.chunks_exact(4).find_map(|entry| {
        let program_number = u16::from_be_bytes([entry[0], entry[1]]);
        // program 0 points at the network PID
        (program_number != 0).then(|| (((entry[2] & 0x1F) as u16) << 8) | entry[3] as u16)
    })
}

/// One elementary stream entry of a PMT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub pid: u16,
    /// Legacy audio codec the entry announces, if any
    pub codec: Option<Codec>,
    /// Offset of the entry inside its section
    offset: usize,
}

/// Elementary streams of a PMT payload, in table order.
pub fn parse_pmt(payload: &[u8]) -> Option<Vec<PmtStream>> {
    let section = section(payload, PMT_TABLE_ID)?;
    let end = section.len() - 4;
    let program_info_length = (((section[10] & 0x0F) as usize) << 8) | section[11] as usize;
    let mut pos = 12 + program_info_length;
    let mut streams = Vec::new();

    while pos + 5 <= end {
        let stream_type = section[pos];
        let pid = (((section[pos + 1] & 0x1F) as u16) << 8) | section[pos + 2] as u16;
        let es_info_length = (((section[pos + 3] & 0x0F) as usize) << 8) | section[pos + 4] as usize;
        let descriptors = section.get(pos + 5..pos + 5 + es_info_length)?;
        streams.push(PmtStream {
            stream_type,
            pid,
            codec: classify_stream(stream_type, descriptors),
            offset: pos,
        });
        pos += 5 + es_info_length;
    }
    Some(streams)
}

fn classify_stream(stream_type: u8, descriptors: &[u8]) -> Option<Codec> {
    match stream_type {
        STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO => Some(Codec::Mp2),
        STREAM_TYPE_AC3 => Some(Codec::Ac3),
        STREAM_TYPE_PRIVATE_PES => {
            let mut rest = descriptors;
            while rest.len() >= 2 {
                let (tag, len) = (rest[0], rest[1] as usize);
                if AC3_DESCRIPTOR_TAGS.contains(&tag) {
                    return Some(Codec::Ac3);
                }
                rest = rest.get(2 + len..)?;
            }
            None
        }
        _ => None,
    }
}

/// First legacy audio stream announced by a PMT.
pub fn find_audio(streams: &[PmtStream]) -> Option<(u16, Codec)> {
    streams
        .iter()
        .find_map(|s| s.codec.map(|codec| (s.pid, codec)))
}

/// Rewrite the PMT entry for `audio_pid` so it announces AAC on
/// `output_pid`, recomputing the section CRC.
///
/// Returns `None` when the packet holds no complete PMT listing that PID.
pub fn rewrite_pmt(
    packet: &[u8],
    audio_pid: u16,
    output_pid: u16,
) -> Option<[u8; TS_PACKET_SIZE]> {
    let header = TsHeader::parse(packet)?;
    let payload_offset = header.payload_offset(packet)?;
    let payload = &packet[payload_offset..];
    let (start, len) = section_bounds(payload)?;
    let entry = parse_pmt(payload)?
        .into_iter()
        .find(|s| s.pid == audio_pid)?;

    let mut out = [0u8; TS_PACKET_SIZE];
    out.copy_from_slice(packet.get(..TS_PACKET_SIZE)?);
    let section = &mut out[payload_offset + start..payload_offset + start + len];
    section[entry.offset] = STREAM_TYPE_AAC_ADTS;
    section[entry.offset + 1] = 0xE0 | (output_pid >> 8) as u8;
    section[entry.offset + 2] = output_pid as u8;

    let crc_at = len - 4;
    let crc = crc32(&section[..crc_at]);
    section[crc_at..].copy_from_slice(&crc.to_be_bytes());
    Some(out)
}

/// Build a complete PSI section from its table id, id field and body,
/// appending the CRC.
pub fn build_section(table_id: u8, table_id_extension: u16, body: &[u8]) -> Vec<u8> {
    let section_length = 5 + body.len() + 4;
    let mut section = Vec::with_capacity(3 + section_length);
    section.push(table_id);
    section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
    section.push(section_length as u8);
    section.extend_from_slice(&table_id_extension.to_be_bytes());
    // version 0, current_next_indicator set
    section.push(0xC1);
    section.push(0x00);
    section.push(0x00);
    section.extend_from_slice(body);
    let crc = crc32(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}
