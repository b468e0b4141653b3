use std::net::Ipv4Addr;

use crate::error::{check_bits, ValidationError};

use super::TCP_PROTOCOL_NUM;

pub const IP_HEADER_LENGTH: usize = 20;
pub const IP_MAX_OPTIONS_LENGTH: usize = 40;
pub(crate) const IP_CHECKSUM_OFFSET: usize = 10;
pub const DEFAULT_TTL: u8 = 64;
/// Don't Fragment, as the 3-bit flags field.
pub const FLAG_DONT_FRAGMENT: u8 = 0b010;
pub const FLAG_MORE_FRAGMENTS: u8 = 0b001;

/// Caller-supplied IPv4 header fields.
///
/// Version (4) and protocol (6) are fixed; header length, total length and checksum are
/// derived when the segment is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    // Differentiated services code point: 6 bits
    pub dscp: u8,
    // Explicit congestion notification: 2 bits
    pub ecn: u8,
    // Identification: 16 bits
    pub identification: u16,
    // Flags: 3 bits
    pub flags: u8,
    // Fragment offset: 13 bits
    pub frag_offset: u16,
    // Time to live: 8 bits
    pub ttl: u8,
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    // Raw option bytes, padded with End-of-Options on the wire
    pub options: Vec<u8>,
}

impl Ipv4Header {
    pub fn new(source_address: Ipv4Addr, destination_address: Ipv4Addr) -> Self {
        Ipv4Header {
            dscp: 0,
            ecn: 0,
            identification: 0,
            flags: FLAG_DONT_FRAGMENT,
            frag_offset: 0,
            ttl: DEFAULT_TTL,
            source_address,
            destination_address,
            options: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_bits("ip dscp", u32::from(self.dscp), 6)?;
        check_bits("ip ecn", u32::from(self.ecn), 2)?;
        check_bits("ip flags", u32::from(self.flags), 3)?;
        check_bits("ip fragment offset", u32::from(self.frag_offset), 13)?;
        if self.options.len() > IP_MAX_OPTIONS_LENGTH {
            return Err(ValidationError::IpOptionsTooLong(self.options.len()));
        }
        Ok(())
    }

    /// Header length in bytes once options are padded to a 32-bit boundary.
    pub fn header_length(&self) -> usize {
        IP_HEADER_LENGTH + self.options.len().next_multiple_of(4)
    }

    /// Serializes the header for a datagram of `total_length` bytes, checksum left as zero.
    pub fn pack(&self, total_length: u16) -> Result<Vec<u8>, ValidationError> {
        self.validate()?;

        let header_length = self.header_length();
        let ihl = (header_length / 4) as u8;
        let mut buffer = Vec::with_capacity(header_length);

        // Version (4 bits) + IHL (4 bits)
        buffer.push((4 << 4) | ihl);
        buffer.push((self.dscp << 2) | self.ecn);
        buffer.extend_from_slice(&total_length.to_be_bytes());
        buffer.extend_from_slice(&self.identification.to_be_bytes());

        // Flags (3 bits) + Fragment Offset (13 bits)
        let flags_frag_offset = (u16::from(self.flags) << 13) | self.frag_offset;
        buffer.extend_from_slice(&flags_frag_offset.to_be_bytes());
        buffer.push(self.ttl);
        buffer.push(TCP_PROTOCOL_NUM);
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.source_address.octets());
        buffer.extend_from_slice(&self.destination_address.octets());

        buffer.extend_from_slice(&self.options);
        buffer.resize(header_length, 0);

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Ipv4Header {
        Ipv4Header::new(Ipv4Addr::new(192, 168, 0, 1), Ipv4Addr::new(192, 168, 0, 199))
    }

    #[test]
    fn test_pack_fixed_header() {
        let packed = header().pack(0x73).unwrap();
        assert_eq!(
            packed,
            vec![
                0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0xc0, 0xa8,
                0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
            ]
        );
    }

    #[test]
    fn test_pack_dscp_ecn_fragment() {
        let ip_header = Ipv4Header {
            dscp: 46,
            ecn: 0b11,
            identification: 0xbeef,
            flags: FLAG_MORE_FRAGMENTS,
            frag_offset: 0x1fff,
            ttl: 1,
            ..header()
        };

        let packed = ip_header.pack(20).unwrap();
        assert_eq!(packed[1], 0xbb);
        assert_eq!(&packed[4..8], &[0xbe, 0xef, 0x3f, 0xff]);
        assert_eq!(packed[8], 1);
    }

    #[test]
    fn test_options_padded_with_zero() {
        let ip_header = Ipv4Header {
            // Router alert is 4 bytes; a lone NOP needs 3 bytes of padding.
            options: vec![0x94, 0x04, 0x00, 0x00, 0x01],
            ..header()
        };

        assert_eq!(ip_header.header_length(), 28);
        let packed = ip_header.pack(28).unwrap();
        assert_eq!(packed[0], 0x47);
        assert_eq!(&packed[20..], &[0x94, 0x04, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_field_out_of_range() {
        let cases = [
            (Ipv4Header { dscp: 64, ..header() }, "ip dscp"),
            (Ipv4Header { ecn: 4, ..header() }, "ip ecn"),
            (Ipv4Header { flags: 8, ..header() }, "ip flags"),
            (Ipv4Header { frag_offset: 0x2000, ..header() }, "ip fragment offset"),
        ];

        for (ip_header, name) in cases {
            match ip_header.pack(20) {
                Err(ValidationError::FieldOutOfRange { field, .. }) => assert_eq!(field, name),
                other => panic!("expected {name} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_options_too_long() {
        let ip_header = Ipv4Header {
            options: vec![1; 41],
            ..header()
        };
        assert_eq!(ip_header.pack(61), Err(ValidationError::IpOptionsTooLong(41)));
    }
}
