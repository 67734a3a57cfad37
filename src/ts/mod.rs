//! MPEG transport stream plumbing
//!
//! Packet framing and classification ([`reader`]), PSI tables ([`psi`]),
//! PES headers ([`pes`]) and the output packetizer ([`writer`]).

pub mod pes;
pub mod psi;
pub mod reader;
pub mod writer;

pub use reader::{AudioPacket, PacketKind, TsReader};
pub use writer::TsWriter;

/// Size of one transport packet
pub const TS_PACKET_SIZE: usize = 188;
/// First byte of every transport packet
pub const TS_SYNC_BYTE: u8 = 0x47;
/// Bytes before the payload or adaptation field
pub const TS_HEADER_SIZE: usize = 4;
/// PID carrying the program association table
pub const PAT_PID: u16 = 0x0000;
/// Null packet PID; also the first value outside the usable PID range
pub const NULL_PID: u16 = 0x1FFF;
/// PTS and DTS wrap at 33 bits
pub const PTS_MASK: u64 = (1 << 33) - 1;

/// Adaptation field flag bits
pub const AF_DISCONTINUITY: u8 = 0x80;
pub const AF_PCR: u8 = 0x10;

/// Fixed four-byte transport packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub transport_error: bool,
    pub payload_start: bool,
    pub pid: u16,
    pub scrambling: u8,
    pub has_adaptation: bool,
    pub has_payload: bool,
    pub continuity: u8,
}

impl TsHeader {
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < TS_HEADER_SIZE || packet[0] != TS_SYNC_BYTE {
            return None;
        }
        Some(Self {
            transport_error: packet[1] & 0x80 != 0,
            payload_start: packet[1] & 0x40 != 0,
            pid: (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16,
            scrambling: packet[3] >> 6,
            has_adaptation: packet[3] & 0x20 != 0,
            has_payload: packet[3] & 0x10 != 0,
            continuity: packet[3] & 0x0F,
        })
    }

    /// Adaptation field bytes after the length byte, if present and well formed.
    pub fn adaptation_field<'a>(&self, packet: &'a [u8]) -> Option<&'a [u8]> {
        if !self.has_adaptation || packet.len() < TS_PACKET_SIZE {
            return None;
        }
        let len = packet[TS_HEADER_SIZE] as usize;
        let end = TS_HEADER_SIZE + 1 + len;
        if end > TS_PACKET_SIZE {
            return None;
        }
        Some(&packet[TS_HEADER_SIZE + 1..end])
    }

    /// Offset of the payload inside a full packet; `None` when there is no
    /// payload or the adaptation field overruns the packet.
    pub fn payload_offset(&self, packet: &[u8]) -> Option<usize> {
        if !self.has_payload || packet.len() < TS_PACKET_SIZE {
            return None;
        }
        let offset = if self.has_adaptation {
            TS_HEADER_SIZE + 1 + packet[TS_HEADER_SIZE] as usize
        } else {
            TS_HEADER_SIZE
        };
        (offset < TS_PACKET_SIZE).then_some(offset)
    }

    /// Whether the adaptation field sets `discontinuity_indicator`
    pub fn discontinuity(&self, packet: &[u8]) -> bool {
        self.adaptation_field(packet)
            .and_then(|af| af.first())
            .is_some_and(|flags| flags & AF_DISCONTINUITY != 0)
    }

    /// The six PCR bytes of the adaptation field, when flagged
    pub fn pcr<'a>(&self, packet: &'a [u8]) -> Option<&'a [u8]> {
        let af = self.adaptation_field(packet)?;
        if af.len() >= 7 && af[0] & AF_PCR != 0 {
            Some(&af[1..7])
        } else {
            None
        }
    }
}
