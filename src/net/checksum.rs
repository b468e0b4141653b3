use std::net::Ipv4Addr;

use crate::error::{PacketError, ValidationError};

use super::tcp::{TCP_CHECKSUM_OFFSET, TCP_HEADER_LENGTH};
use super::TCP_PROTOCOL_NUM;

pub const PSEUDO_HEADER_LENGTH: usize = 12;

/// Adds `buffer` to a running one's-complement sum as big-endian 16-bit words.
///
/// An odd trailing byte is the high byte of a virtual word whose low byte is zero;
/// nothing is appended to the buffer. Carries are folded back in as they occur, so
/// the accumulator never exceeds 17 bits.
pub fn ones_complement_sum(initial: u32, buffer: &[u8]) -> u32 {
    let mut chunks = buffer.chunks_exact(2);
    let mut sum = initial;

    for word in chunks.by_ref() {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        sum = (sum & 0xffff) + (sum >> 16);
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
        sum = (sum & 0xffff) + (sum >> 16);
    }

    sum
}

/// Folds every carry above bit 15 back into the low 16 bits.
pub fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// RFC 1071 Internet checksum of `buffer`.
///
/// A folded sum of 0xffff complements to 0x0000.
pub fn internet_checksum(buffer: &[u8]) -> u16 {
    !fold(ones_complement_sum(0, buffer))
}

/// Same as [`internet_checksum`], in network byte order.
pub fn rfc1071_checksum(buffer: &[u8]) -> [u8; 2] {
    internet_checksum(buffer).to_be_bytes()
}

/// Builds the 12-byte pseudo-header prepended to a segment for checksumming.
pub fn pseudo_header(
    source_ip: &Ipv4Addr,
    dest_ip: &Ipv4Addr,
    protocol: u8,
    segment_length: u16,
) -> [u8; PSEUDO_HEADER_LENGTH] {
    let mut pseudo_header = [0u8; PSEUDO_HEADER_LENGTH];
    pseudo_header[0..4].copy_from_slice(&source_ip.octets());
    pseudo_header[4..8].copy_from_slice(&dest_ip.octets());
    pseudo_header[8] = 0;
    pseudo_header[9] = protocol;
    pseudo_header[10..12].copy_from_slice(&segment_length.to_be_bytes());
    pseudo_header
}

/// TCP checksum of `segment` (header, options and payload) exactly as given.
///
/// The caller is responsible for zeroing the checksum field beforehand.
pub fn tcp_checksum(
    source_ip: &Ipv4Addr,
    dest_ip: &Ipv4Addr,
    segment: &[u8],
) -> Result<u16, ValidationError> {
    let segment_length = u16::try_from(segment.len())
        .map_err(|_| ValidationError::TotalLengthExceeded(segment.len()))?;
    let pseudo = pseudo_header(source_ip, dest_ip, TCP_PROTOCOL_NUM, segment_length);

    // The pseudo-header is 12 bytes, so summing it first keeps the segment word-aligned.
    let sum = ones_complement_sum(ones_complement_sum(0, &pseudo), segment);
    Ok(!fold(sum))
}

/// Parses a dotted-quad IPv4 address.
pub fn parse_address(address: &str) -> Result<Ipv4Addr, ValidationError> {
    address
        .parse::<Ipv4Addr>()
        .map_err(|_| ValidationError::InvalidAddress(address.to_string()))
}

/// The checksum a TCP segment carries next to the one its bytes add up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumCheck {
    pub carried: u16,
    pub computed: u16,
}

impl ChecksumCheck {
    pub fn is_valid(&self) -> bool {
        self.carried == self.computed
    }
}

/// Recomputes the checksum of a raw TCP segment, with its checksum field taken as zero.
pub fn check_tcp_checksum_v4(
    source_ip: &Ipv4Addr,
    dest_ip: &Ipv4Addr,
    segment: &[u8],
) -> Result<ChecksumCheck, PacketError> {
    if segment.len() < TCP_HEADER_LENGTH {
        return Err(ValidationError::SegmentTooShort(segment.len()).into());
    }

    let carried = u16::from_be_bytes([
        segment[TCP_CHECKSUM_OFFSET],
        segment[TCP_CHECKSUM_OFFSET + 1],
    ]);

    let mut zeroed = segment.to_vec();
    zeroed[TCP_CHECKSUM_OFFSET..TCP_CHECKSUM_OFFSET + 2].fill(0);
    let computed = tcp_checksum(source_ip, dest_ip, &zeroed)?;

    Ok(ChecksumCheck { carried, computed })
}

/// Recomputes the checksum of a raw TCP segment and compares it with the one it carries.
pub fn verify_tcp_checksum_v4(
    source_ip: &Ipv4Addr,
    dest_ip: &Ipv4Addr,
    segment: &[u8],
) -> Result<bool, PacketError> {
    Ok(check_tcp_checksum_v4(source_ip, dest_ip, segment)?.is_valid())
}

/// Like [`verify_tcp_checksum_v4`], taking the addresses in dotted-quad form.
pub fn verify_tcp_checksum(
    source_ip: &str,
    dest_ip: &str,
    segment: &[u8],
) -> Result<bool, PacketError> {
    let source_ip = parse_address(source_ip)?;
    let dest_ip = parse_address(dest_ip)?;
    verify_tcp_checksum_v4(&source_ip, &dest_ip, segment)
}
