use std::io;

use thiserror::Error;

/// Top level error returned by every fallible operation in the crate.
///
/// The four categories let callers tell a bad packet (`Validation`, `Encoding`,
/// `Decoding`) apart from a bad link (`Transmission`).
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),
    #[error("decoding failed: {0}")]
    Decoding(#[from] DecodingError),
    #[error("transmission failed: {0}")]
    Transmission(#[from] TransmissionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} value {value} does not fit in {bits} bits")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        bits: u8,
    },
    #[error("total length {0} exceeds 65535")]
    TotalLengthExceeded(usize),
    #[error("{header} header length {len} is outside 20..=60 bytes")]
    HeaderLength { header: &'static str, len: usize },
    #[error("IP options length {0} exceeds 40 bytes")]
    IpOptionsTooLong(usize),
    #[error("TCP segment of {0} bytes is shorter than a TCP header")]
    SegmentTooShort(usize),
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),
    #[error("malformed datagram: {0}")]
    MalformedDatagram(&'static str),
    #[error("invalid argument {0:?}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("options encode to {0} bytes, more than the 40 bytes available")]
    OptionsTooLong(usize),
    #[error("option kind {kind} with {len} bytes cannot be described by a length byte")]
    OptionTooLong { kind: u8, len: usize },
    #[error("unknown option cannot use kind {0}, which is reserved for EOL and NOP")]
    ReservedKind(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodingError {
    #[error("option kind {kind} at offset {offset} is missing its length byte")]
    MissingLength { kind: u8, offset: usize },
    #[error("option kind {kind} declares length {len}, less than 2")]
    LengthTooSmall { kind: u8, len: usize },
    #[error("option kind {kind} declares length {len} but only {remaining} bytes remain")]
    Truncated {
        kind: u8,
        len: usize,
        remaining: usize,
    },
    #[error("SACK option carries {0} bytes, not a multiple of 8")]
    SackLength(usize),
}

#[derive(Debug, Error)]
pub enum TransmissionError {
    #[error("failed to open raw socket: {0}")]
    Open(#[source] io::Error),
    #[error("failed to send datagram: {0}")]
    Send(#[source] io::Error),
    #[error("short send: wrote {written} of {len} bytes")]
    ShortSend { written: usize, len: usize },
    #[error("capture file error: {0}")]
    Capture(#[source] io::Error),
}

impl PacketError {
    pub fn is_transmission(&self) -> bool {
        matches!(self, PacketError::Transmission(_))
    }
}

/// Checks that `value` fits in the low `bits` bits, naming `field` on failure.
pub(crate) fn check_bits(field: &'static str, value: u32, bits: u8) -> Result<(), ValidationError> {
    if value >> bits != 0 {
        return Err(ValidationError::FieldOutOfRange { field, value, bits });
    }
    Ok(())
}
