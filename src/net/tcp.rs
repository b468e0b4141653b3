use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::error::{check_bits, ValidationError};

pub const TCP_HEADER_LENGTH: usize = 20;
pub const TCP_MAX_HEADER_LENGTH: usize = 60;
pub(crate) const TCP_CHECKSUM_OFFSET: usize = 16;
pub const DEFAULT_WINDOW: u16 = 65535;

bitflags! {
    /// The nine TCP control bits. `NS` travels in the low bit of the data offset byte.
    #[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Default)]
    pub struct TcpFlags: u16 {
        const FIN = 0b0_0000_0001;
        const SYN = 0b0_0000_0010;
        const RST = 0b0_0000_0100;
        const PSH = 0b0_0000_1000;
        const ACK = 0b0_0001_0000;
        const URG = 0b0_0010_0000;
        const ECE = 0b0_0100_0000;
        const CWR = 0b0_1000_0000;
        const NS  = 0b1_0000_0000;
    }
}

// Letters in the order they are printed, one per flag.
const FLAG_LETTERS: [(char, TcpFlags); 9] = [
    ('F', TcpFlags::FIN),
    ('S', TcpFlags::SYN),
    ('R', TcpFlags::RST),
    ('P', TcpFlags::PSH),
    ('A', TcpFlags::ACK),
    ('U', TcpFlags::URG),
    ('E', TcpFlags::ECE),
    ('C', TcpFlags::CWR),
    ('N', TcpFlags::NS),
];

impl FromStr for TcpFlags {
    type Err = ValidationError;

    /// Parses a letter string such as `"S"`, `"SA"` or `"FPU"`. An empty string means no flags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars().try_fold(TcpFlags::empty(), |flags, c| {
            FLAG_LETTERS
                .iter()
                .find(|(letter, _)| *letter == c.to_ascii_uppercase())
                .map(|(_, flag)| flags | *flag)
                .ok_or_else(|| ValidationError::InvalidArgument(s.to_string()))
        })
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, flag) in FLAG_LETTERS {
            if self.contains(flag) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// Caller-supplied TCP header fields.
///
/// Data offset and checksum are derived when the segment is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    /// Source port (16 bits)
    pub source_port: u16,
    /// Destination port (16 bits)
    pub destination_port: u16,
    /// Sequence number (32 bits)
    pub sequence_number: u32,
    /// Acknowledgment number (32 bits)
    pub ack_number: u32,
    /// Reserved (3 bits)
    pub reserved: u8,
    /// Control flags (9 bits)
    pub flags: TcpFlags,
    /// Window size (16 bits)
    pub window: u16,
    /// Urgent pointer (16 bits)
    pub urgent_pointer: u16,
}

impl TcpHeader {
    pub fn new(source_port: u16, destination_port: u16) -> Self {
        TcpHeader {
            source_port,
            destination_port,
            sequence_number: 0,
            ack_number: 0,
            reserved: 0,
            flags: TcpFlags::empty(),
            window: DEFAULT_WINDOW,
            urgent_pointer: 0,
        }
    }

    /// A SYN with everything else at its default.
    pub fn syn(source_port: u16, destination_port: u16) -> Self {
        TcpHeader {
            flags: TcpFlags::SYN,
            ..TcpHeader::new(source_port, destination_port)
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_bits("tcp reserved", u32::from(self.reserved), 3)?;
        check_bits("tcp flags", u32::from(self.flags.bits()), 9)
    }

    /// Serializes the fixed header followed by `encoded_options`, checksum left as zero.
    ///
    /// `encoded_options` must already be padded to a multiple of four bytes.
    pub fn pack(&self, encoded_options: &[u8]) -> Result<Vec<u8>, ValidationError> {
        self.validate()?;

        let total_length_bytes = TCP_HEADER_LENGTH + encoded_options.len();
        if total_length_bytes > TCP_MAX_HEADER_LENGTH || total_length_bytes % 4 != 0 {
            return Err(ValidationError::HeaderLength {
                header: "tcp",
                len: total_length_bytes,
            });
        }
        let data_offset = (total_length_bytes / 4) as u8;

        let mut buffer = Vec::with_capacity(total_length_bytes);
        buffer.extend_from_slice(&self.source_port.to_be_bytes());
        buffer.extend_from_slice(&self.destination_port.to_be_bytes());
        buffer.extend_from_slice(&self.sequence_number.to_be_bytes());
        buffer.extend_from_slice(&self.ack_number.to_be_bytes());

        let bits = self.flags.bits();
        let offset_and_reserved: u8 = (data_offset << 4) | (self.reserved << 1) | (bits >> 8) as u8;
        buffer.push(offset_and_reserved);
        buffer.push(bits as u8);

        buffer.extend_from_slice(&self.window.to_be_bytes());
        // Checksum is filled in once the whole segment is known.
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.urgent_pointer.to_be_bytes());
        buffer.extend_from_slice(encoded_options);

        Ok(buffer)
    }
}
