use std::net::Ipv4Addr;

use tracing::debug;

use crate::error::{PacketError, ValidationError};

use super::checksum::{
    fold, internet_checksum, ones_complement_sum, tcp_checksum, verify_tcp_checksum_v4,
};
use super::ip::{Ipv4Header, IP_CHECKSUM_OFFSET, IP_HEADER_LENGTH};
use super::options::{decode_options, encode_options, TcpOption};
use super::tcp::{TcpFlags, TcpHeader, TCP_CHECKSUM_OFFSET, TCP_HEADER_LENGTH};
use super::TCP_PROTOCOL_NUM;

pub const MAX_TOTAL_LENGTH: usize = u16::MAX as usize;

/// Everything needed to lay out one IPv4/TCP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub ip: Ipv4Header,
    pub tcp: TcpHeader,
    pub options: Vec<TcpOption>,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(ip: Ipv4Header, tcp: TcpHeader) -> Self {
        Segment {
            ip,
            tcp,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<TcpOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn build(&self) -> Result<Datagram, PacketError> {
        build(&self.ip, &self.tcp, &self.options, &self.payload)
    }
}

/// Lays out IPv4 header, TCP header, options and payload with both checksums filled in.
///
/// Either the whole datagram is returned or nothing is.
pub fn build(
    ip: &Ipv4Header,
    tcp: &TcpHeader,
    options: &[TcpOption],
    payload: &[u8],
) -> Result<Datagram, PacketError> {
    let encoded_options = encode_options(options)?;
    let tcp_header_len = TCP_HEADER_LENGTH + encoded_options.len();

    ip.validate()?;
    let ip_header_len = ip.header_length();

    let total_length = ip_header_len + tcp_header_len + payload.len();
    if total_length > MAX_TOTAL_LENGTH {
        return Err(ValidationError::TotalLengthExceeded(total_length).into());
    }

    let mut ip_bytes = ip.pack(total_length as u16)?;

    let mut tcp_bytes = tcp.pack(&encoded_options)?;
    tcp_bytes.extend_from_slice(payload);

    let tcp_sum = tcp_checksum(&ip.source_address, &ip.destination_address, &tcp_bytes)?;
    tcp_bytes[TCP_CHECKSUM_OFFSET..TCP_CHECKSUM_OFFSET + 2].copy_from_slice(&tcp_sum.to_be_bytes());

    let ip_sum = internet_checksum(&ip_bytes);
    ip_bytes[IP_CHECKSUM_OFFSET..IP_CHECKSUM_OFFSET + 2].copy_from_slice(&ip_sum.to_be_bytes());

    debug!(
        ihl = ip_header_len / 4,
        data_offset = tcp_header_len / 4,
        total_length,
        tcp_checksum = tcp_sum,
        ip_checksum = ip_sum,
        "built segment"
    );

    ip_bytes.extend_from_slice(&tcp_bytes);
    Ok(Datagram {
        bytes: ip_bytes,
        ip_header_len,
        tcp_header_len,
    })
}

/// A finished IPv4/TCP datagram. Immutable; build a new [`Segment`] to change anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    bytes: Vec<u8>,
    ip_header_len: usize,
    tcp_header_len: usize,
}

impl Datagram {
    /// Accepts a buffer laid out the way [`build`] lays one out.
    ///
    /// This checks structure only. Use [`Datagram::verify`] for the checksums.
    pub fn parse(bytes: &[u8]) -> Result<Datagram, ValidationError> {
        let malformed = ValidationError::MalformedDatagram;

        if bytes.len() < IP_HEADER_LENGTH + TCP_HEADER_LENGTH {
            return Err(malformed("shorter than minimal IPv4 and TCP headers"));
        }
        if bytes[0] >> 4 != 4 {
            return Err(malformed("not IPv4"));
        }
        if bytes[9] != TCP_PROTOCOL_NUM {
            return Err(malformed("not TCP"));
        }

        let ip_header_len = usize::from(bytes[0] & 0x0f) * 4;
        if ip_header_len < IP_HEADER_LENGTH {
            return Err(ValidationError::HeaderLength {
                header: "ip",
                len: ip_header_len,
            });
        }

        let total_length = usize::from(u16::from_be_bytes([bytes[2], bytes[3]]));
        if total_length != bytes.len() {
            return Err(malformed("total length does not match buffer length"));
        }
        if ip_header_len + TCP_HEADER_LENGTH > total_length {
            return Err(malformed("no room for a TCP header"));
        }

        let tcp_header_len = usize::from(bytes[ip_header_len + 12] >> 4) * 4;
        if tcp_header_len < TCP_HEADER_LENGTH || ip_header_len + tcp_header_len > total_length {
            return Err(ValidationError::HeaderLength {
                header: "tcp",
                len: tcp_header_len,
            });
        }

        Ok(Datagram {
            bytes: bytes.to_vec(),
            ip_header_len,
            tcp_header_len,
        })
    }

    /// True when both the IPv4 header checksum and the TCP checksum hold.
    pub fn verify(&self) -> Result<bool, PacketError> {
        let ip_ok = fold(ones_complement_sum(0, self.ip_header())) == 0xffff;
        let tcp_ok = verify_tcp_checksum_v4(
            &self.source_address(),
            &self.destination_address(),
            self.tcp_segment(),
        )?;
        Ok(ip_ok && tcp_ok)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn ip_header(&self) -> &[u8] {
        &self.bytes[..self.ip_header_len]
    }

    /// TCP header, options and payload: the bytes the TCP checksum covers.
    pub fn tcp_segment(&self) -> &[u8] {
        &self.bytes[self.ip_header_len..]
    }

    pub fn tcp_header(&self) -> &[u8] {
        &self.tcp_segment()[..self.tcp_header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.tcp_segment()[self.tcp_header_len..]
    }

    pub fn version(&self) -> u8 {
        self.bytes[0] >> 4
    }

    /// IPv4 header length in 32-bit words.
    pub fn ihl(&self) -> u8 {
        self.bytes[0] & 0x0f
    }

    pub fn dscp(&self) -> u8 {
        self.bytes[1] >> 2
    }

    pub fn ecn(&self) -> u8 {
        self.bytes[1] & 0x03
    }

    pub fn total_length(&self) -> u16 {
        self.ip_u16(2)
    }

    pub fn identification(&self) -> u16 {
        self.ip_u16(4)
    }

    pub fn ip_flags(&self) -> u8 {
        self.bytes[6] >> 5
    }

    pub fn frag_offset(&self) -> u16 {
        self.ip_u16(6) & 0x1fff
    }

    pub fn ttl(&self) -> u8 {
        self.bytes[8]
    }

    pub fn protocol(&self) -> u8 {
        self.bytes[9]
    }

    pub fn ip_checksum(&self) -> u16 {
        self.ip_u16(IP_CHECKSUM_OFFSET)
    }

    pub fn source_address(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.bytes[12], self.bytes[13], self.bytes[14], self.bytes[15])
    }

    pub fn destination_address(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.bytes[16], self.bytes[17], self.bytes[18], self.bytes[19])
    }

    pub fn ip_options(&self) -> &[u8] {
        &self.ip_header()[IP_HEADER_LENGTH..]
    }

    pub fn source_port(&self) -> u16 {
        self.tcp_u16(0)
    }

    pub fn destination_port(&self) -> u16 {
        self.tcp_u16(2)
    }

    pub fn sequence_number(&self) -> u32 {
        self.tcp_u32(4)
    }

    pub fn ack_number(&self) -> u32 {
        self.tcp_u32(8)
    }

    /// TCP header length in 32-bit words.
    pub fn data_offset(&self) -> u8 {
        self.tcp_header()[12] >> 4
    }

    pub fn tcp_reserved(&self) -> u8 {
        (self.tcp_header()[12] >> 1) & 0x07
    }

    pub fn tcp_flags(&self) -> TcpFlags {
        let header = self.tcp_header();
        TcpFlags::from_bits_truncate((u16::from(header[12] & 0x01) << 8) | u16::from(header[13]))
    }

    pub fn window(&self) -> u16 {
        self.tcp_u16(14)
    }

    pub fn tcp_checksum(&self) -> u16 {
        self.tcp_u16(TCP_CHECKSUM_OFFSET)
    }

    pub fn urgent_pointer(&self) -> u16 {
        self.tcp_u16(18)
    }

    /// Encoded option bytes, padding included.
    pub fn options_bytes(&self) -> &[u8] {
        &self.tcp_header()[TCP_HEADER_LENGTH..]
    }

    pub fn options(&self) -> Result<Vec<TcpOption>, PacketError> {
        Ok(decode_options(self.options_bytes())?)
    }

    fn ip_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    fn tcp_u16(&self, offset: usize) -> u16 {
        let header = self.tcp_header();
        u16::from_be_bytes([header[offset], header[offset + 1]])
    }

    fn tcp_u32(&self, offset: usize) -> u32 {
        let header = self.tcp_header();
        u32::from_be_bytes([
            header[offset],
            header[offset + 1],
            header[offset + 2],
            header[offset + 3],
        ])
    }
}

impl AsRef<[u8]> for Datagram {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncodingError;
    use crate::net::options::trim_padding;
    use pnet_packet::util;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 36, 50, 214);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 36, 50, 148);

    fn fingerprint_options() -> Vec<TcpOption> {
        vec![
            TcpOption::WindowScale(10),
            TcpOption::NoOp,
            TcpOption::MaxSegmentSize(1460),
            TcpOption::Timestamp(0xFFFFFFFF, 0),
            TcpOption::SackPermitted,
        ]
    }

    fn custom_segment() -> Segment {
        Segment::new(Ipv4Header::new(SRC, DST), TcpHeader::syn(80, 53))
            .with_options(fingerprint_options())
            .with_payload("Custom payload data")
    }

    #[test]
    fn test_build_options_layout() {
        let datagram = Segment::new(Ipv4Header::new(SRC, DST), TcpHeader::syn(80, 53))
            .with_options(fingerprint_options())
            .build()
            .unwrap();

        assert_eq!(datagram.options_bytes().len(), 20);
        assert_eq!(datagram.data_offset(), 10);
        assert_eq!(datagram.ihl(), 5);
        assert_eq!(datagram.total_length(), 60);
        assert_eq!(
            datagram.tcp_segment(),
            hex::decode("005000350000000000000000a002ffffc4cf000003030a01020405b4080affffffff000000000402")
                .unwrap()
        );
    }

    #[test]
    fn test_build_with_payload() {
        let datagram = custom_segment().build().unwrap();

        assert_eq!(datagram.len(), 79);
        assert_eq!(datagram.total_length(), 79);
        assert_eq!(datagram.payload(), b"Custom payload data");
        assert_eq!(datagram.tcp_checksum(), 0x6bcf);
        assert_eq!(datagram.ip_checksum(), 0xc0f7);
        assert_eq!(
            datagram.ip_header(),
            &[
                0x45, 0x00, 0x00, 0x4f, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0xc0, 0xf7, 10, 36, 50,
                214, 10, 36, 50, 148
            ]
        );
        assert!(datagram.verify().unwrap());
    }

    #[test]
    fn test_accessors() {
        let segment = Segment {
            ip: Ipv4Header {
                dscp: 10,
                ecn: 1,
                identification: 4242,
                ttl: 128,
                ..Ipv4Header::new(SRC, DST)
            },
            tcp: TcpHeader {
                sequence_number: 0xdeadbeef,
                ack_number: 7,
                reserved: 0b011,
                flags: TcpFlags::ACK | TcpFlags::PSH | TcpFlags::NS,
                window: 512,
                urgent_pointer: 3,
                ..TcpHeader::new(4000, 443)
            },
            options: vec![TcpOption::MaxSegmentSize(1400)],
            payload: vec![1, 2, 3],
        };
        let datagram = segment.build().unwrap();

        assert_eq!(datagram.version(), 4);
        assert_eq!(datagram.dscp(), 10);
        assert_eq!(datagram.ecn(), 1);
        assert_eq!(datagram.identification(), 4242);
        assert_eq!(datagram.ip_flags(), 0b010);
        assert_eq!(datagram.frag_offset(), 0);
        assert_eq!(datagram.ttl(), 128);
        assert_eq!(datagram.protocol(), 6);
        assert_eq!(datagram.source_address(), SRC);
        assert_eq!(datagram.destination_address(), DST);
        assert_eq!(datagram.source_port(), 4000);
        assert_eq!(datagram.destination_port(), 443);
        assert_eq!(datagram.sequence_number(), 0xdeadbeef);
        assert_eq!(datagram.ack_number(), 7);
        assert_eq!(datagram.data_offset(), 6);
        assert_eq!(datagram.tcp_reserved(), 0b011);
        assert_eq!(datagram.tcp_flags(), TcpFlags::ACK | TcpFlags::PSH | TcpFlags::NS);
        assert_eq!(datagram.window(), 512);
        assert_eq!(datagram.urgent_pointer(), 3);
        assert_eq!(datagram.options().unwrap(), vec![TcpOption::MaxSegmentSize(1400)]);
        assert_eq!(datagram.payload(), &[1, 2, 3]);
        assert!(datagram.verify().unwrap());
    }

    #[test]
    fn test_checksums_match_pnet() {
        let datagram = custom_segment().build().unwrap();

        assert_eq!(util::checksum(datagram.ip_header(), 5), datagram.ip_checksum());
        assert_eq!(
            util::ipv4_checksum(
                datagram.tcp_segment(),
                8,
                &[],
                &SRC,
                &DST,
                pnet_packet::ip::IpNextHeaderProtocols::Tcp
            ),
            datagram.tcp_checksum()
        );
    }

    #[test]
    fn test_every_build_verifies() {
        let payloads: [&[u8]; 4] = [b"", b"x", b"odd length payload", &[0xff; 1000]];
        let option_sets = [
            vec![],
            fingerprint_options(),
            vec![TcpOption::SackBlocks(vec![(1, 2), (3, 4), (5, 6)])],
            vec![TcpOption::WindowScale(3), TcpOption::EndOfList],
        ];

        for payload in payloads {
            for options in &option_sets {
                let mut ip = Ipv4Header::new(SRC, DST);
                ip.options = vec![0x01; payload.len() % 5];

                let datagram = build(&ip, &TcpHeader::syn(1234, 80), options, payload).unwrap();
                assert!(verify_tcp_checksum_v4(&SRC, &DST, datagram.tcp_segment()).unwrap());
                assert!(datagram.verify().unwrap());
                assert_eq!(datagram.payload(), payload);

                let mut decoded = datagram.options().unwrap();
                trim_padding(&mut decoded);
                assert_eq!(&decoded, options);
            }
        }
    }

    #[test]
    fn test_total_length_exceeded() {
        let segment = custom_segment().with_payload(vec![0u8; 65535 - 60 + 1]);
        let err = segment.build().unwrap_err();
        assert!(matches!(
            err,
            PacketError::Validation(ValidationError::TotalLengthExceeded(65536))
        ));

        // One byte less fits exactly.
        let segment = custom_segment().with_payload(vec![0u8; 65535 - 60]);
        assert_eq!(segment.build().unwrap().total_length(), 65535);
    }

    #[test]
    fn test_options_over_capacity() {
        let segment = custom_segment().with_options(vec![TcpOption::Timestamp(1, 2); 5]);
        assert!(matches!(
            segment.build(),
            Err(PacketError::Encoding(EncodingError::OptionsTooLong(50)))
        ));
    }

    #[test]
    fn test_invalid_field_reports_validation() {
        let mut segment = custom_segment();
        segment.ip.frag_offset = 0x2000;
        assert!(matches!(
            segment.build(),
            Err(PacketError::Validation(ValidationError::FieldOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_parse_round_trip() {
        let datagram = custom_segment().build().unwrap();
        let parsed = Datagram::parse(datagram.as_bytes()).unwrap();

        assert_eq!(parsed, datagram);
        assert_eq!(parsed.options().unwrap(), fingerprint_options());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let bytes = custom_segment().build().unwrap().into_bytes();

        assert!(Datagram::parse(&bytes[..39]).is_err());
        assert!(Datagram::parse(&bytes[..60]).is_err());

        let mut not_tcp = bytes.clone();
        not_tcp[9] = 17;
        assert_eq!(
            Datagram::parse(&not_tcp),
            Err(ValidationError::MalformedDatagram("not TCP"))
        );

        let mut bad_offset = bytes.clone();
        bad_offset[32] = 0x40;
        assert_eq!(
            Datagram::parse(&bad_offset),
            Err(ValidationError::HeaderLength {
                header: "tcp",
                len: 16
            })
        );
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut bytes = custom_segment().build().unwrap().into_bytes();
        bytes[8] = 63;
        assert!(!Datagram::parse(&bytes).unwrap().verify().unwrap());

        let mut bytes = custom_segment().build().unwrap().into_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x20;
        assert!(!Datagram::parse(&bytes).unwrap().verify().unwrap());
    }
}
