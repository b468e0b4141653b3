use std::fmt::{self, Formatter};
use std::str::FromStr;

use crate::error::{DecodingError, EncodingError, ValidationError};

pub const TCP_MAX_OPTIONS_LENGTH: usize = 40;

const KIND_EOL: u8 = 0;
const KIND_NOP: u8 = 1;
const KIND_MSS: u8 = 2;
const KIND_WSCALE: u8 = 3;
const KIND_SACK_PERM: u8 = 4;
const KIND_SACK: u8 = 5;
const KIND_TIMESTAMP: u8 = 8;

/// A single TCP option. Order within a list is preserved on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpOption {
    EndOfList,
    NoOp,
    MaxSegmentSize(u16),
    WindowScale(u8),
    SackPermitted,
    /// TS value, TS echo reply
    Timestamp(u32, u32),
    /// (left edge, right edge) pairs
    SackBlocks(Vec<(u32, u32)>),
    Unknown { kind: u8, data: Vec<u8> },
}

impl TcpOption {
    pub fn kind(&self) -> u8 {
        match self {
            TcpOption::EndOfList => KIND_EOL,
            TcpOption::NoOp => KIND_NOP,
            TcpOption::MaxSegmentSize(_) => KIND_MSS,
            TcpOption::WindowScale(_) => KIND_WSCALE,
            TcpOption::SackPermitted => KIND_SACK_PERM,
            TcpOption::Timestamp(..) => KIND_TIMESTAMP,
            TcpOption::SackBlocks(_) => KIND_SACK,
            TcpOption::Unknown { kind, .. } => *kind,
        }
    }

    /// Bytes this option occupies on the wire, kind and length bytes included.
    pub fn encoded_len(&self) -> usize {
        match self {
            TcpOption::EndOfList | TcpOption::NoOp => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::Timestamp(..) => 10,
            TcpOption::SackBlocks(blocks) => 2 + 8 * blocks.len(),
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    fn write_to(&self, buffer: &mut Vec<u8>) -> Result<(), EncodingError> {
        let kind = self.kind();
        buffer.push(kind);
        if matches!(self, TcpOption::EndOfList | TcpOption::NoOp) {
            return Ok(());
        }

        let len = self.encoded_len();
        let len_byte =
            u8::try_from(len).map_err(|_| EncodingError::OptionTooLong { kind, len })?;
        buffer.push(len_byte);

        match self {
            TcpOption::MaxSegmentSize(mss) => buffer.extend_from_slice(&mss.to_be_bytes()),
            TcpOption::WindowScale(shift) => buffer.push(*shift),
            TcpOption::Timestamp(ts_val, ts_ecr) => {
                buffer.extend_from_slice(&ts_val.to_be_bytes());
                buffer.extend_from_slice(&ts_ecr.to_be_bytes());
            }
            TcpOption::SackBlocks(blocks) => {
                for (left, right) in blocks {
                    buffer.extend_from_slice(&left.to_be_bytes());
                    buffer.extend_from_slice(&right.to_be_bytes());
                }
            }
            TcpOption::Unknown { data, .. } => buffer.extend_from_slice(data),
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Display for TcpOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TcpOption::EndOfList => write!(f, "EOL"),
            TcpOption::NoOp => write!(f, "NOP"),
            TcpOption::MaxSegmentSize(mss) => write!(f, "MSS({})", mss),
            TcpOption::WindowScale(shift) => write!(f, "WS({})", shift),
            TcpOption::SackPermitted => write!(f, "SACK_OK"),
            TcpOption::Timestamp(ts_val, ts_ecr) => write!(f, "TS({},{})", ts_val, ts_ecr),
            TcpOption::SackBlocks(blocks) => {
                write!(f, "SACK(")?;
                for (i, (left, right)) in blocks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}-{}", left, right)?;
                }
                write!(f, ")")
            }
            TcpOption::Unknown { kind, data } => write!(f, "UNK({},{}B)", kind, data.len()),
        }
    }
}

/// Encodes `options` in order, right-padded with NOPs to a multiple of four bytes.
pub fn encode_options(options: &[TcpOption]) -> Result<Vec<u8>, EncodingError> {
    let unpadded: usize = options.iter().map(TcpOption::encoded_len).sum();
    if unpadded > TCP_MAX_OPTIONS_LENGTH {
        return Err(EncodingError::OptionsTooLong(unpadded));
    }

    let padded = unpadded.next_multiple_of(4);
    let mut buffer = Vec::with_capacity(padded);
    for option in options {
        if let TcpOption::Unknown {
            kind: kind @ (KIND_EOL | KIND_NOP),
            ..
        } = option
        {
            return Err(EncodingError::ReservedKind(*kind));
        }
        option.write_to(&mut buffer)?;
    }
    buffer.resize(padded, KIND_NOP);

    Ok(buffer)
}

/// Decodes an option stream, stopping after an EOL or at the end of the buffer.
///
/// Known kinds with an unexpected length come back as [`TcpOption::Unknown`].
pub fn decode_options(data: &[u8]) -> Result<Vec<TcpOption>, DecodingError> {
    let mut options = Vec::new();
    let mut cursor = 0;

    while cursor < data.len() {
        let kind = data[cursor];
        match kind {
            KIND_EOL => {
                options.push(TcpOption::EndOfList);
                break;
            }
            KIND_NOP => {
                options.push(TcpOption::NoOp);
                cursor += 1;
                continue;
            }
            _ => {}
        }

        let len = *data.get(cursor + 1).ok_or(DecodingError::MissingLength {
            kind,
            offset: cursor,
        })? as usize;
        if len < 2 {
            return Err(DecodingError::LengthTooSmall { kind, len });
        }
        let remaining = data.len() - cursor;
        if len > remaining {
            return Err(DecodingError::Truncated {
                kind,
                len,
                remaining,
            });
        }

        let value = &data[cursor + 2..cursor + len];
        cursor += len;

        let option = match (kind, value.len()) {
            (KIND_MSS, 2) => TcpOption::MaxSegmentSize(u16::from_be_bytes([value[0], value[1]])),
            (KIND_WSCALE, 1) => TcpOption::WindowScale(value[0]),
            (KIND_SACK_PERM, 0) => TcpOption::SackPermitted,
            (KIND_TIMESTAMP, 8) => TcpOption::Timestamp(read_u32(&value[0..4]), read_u32(&value[4..8])),
            (KIND_SACK, n) => {
                if n % 8 != 0 {
                    return Err(DecodingError::SackLength(n));
                }
                TcpOption::SackBlocks(
                    value
                        .chunks_exact(8)
                        .map(|block| (read_u32(&block[0..4]), read_u32(&block[4..8])))
                        .collect(),
                )
            }
            _ => TcpOption::Unknown {
                kind,
                data: value.to_vec(),
            },
        };
        options.push(option);
    }

    Ok(options)
}

/// Drops the trailing NOPs that [`encode_options`] adds for alignment.
pub fn trim_padding(options: &mut Vec<TcpOption>) {
    while options.last() == Some(&TcpOption::NoOp) {
        options.pop();
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl FromStr for TcpOption {
    type Err = ValidationError;

    /// Parses literals such as `mss=1460`, `wscale=10`, `nop`, `eol`, `sackok`,
    /// `ts=4294967295:0`, `sack=100:200,300:400` and `kind=30:0a0b`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidArgument(s.to_string());
        let (name, value) = match s.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (s, None),
        };

        let option = match (name.to_ascii_lowercase().as_str(), value) {
            ("eol", None) => TcpOption::EndOfList,
            ("nop", None) => TcpOption::NoOp,
            ("sackok", None) => TcpOption::SackPermitted,
            ("mss", Some(v)) => TcpOption::MaxSegmentSize(v.parse().map_err(|_| invalid())?),
            ("wscale", Some(v)) => TcpOption::WindowScale(v.parse().map_err(|_| invalid())?),
            ("ts", Some(v)) => {
                let (ts_val, ts_ecr) = parse_pair(v).ok_or_else(invalid)?;
                TcpOption::Timestamp(ts_val, ts_ecr)
            }
            ("sack", Some(v)) => TcpOption::SackBlocks(
                v.split(',')
                    .map(parse_pair)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(invalid)?,
            ),
            ("kind", Some(v)) => {
                let (kind, data) = v.split_once(':').unwrap_or((v, ""));
                TcpOption::Unknown {
                    kind: kind.parse().map_err(|_| invalid())?,
                    data: hex::decode(data).map_err(|_| invalid())?,
                }
            }
            _ => return Err(invalid()),
        };
        Ok(option)
    }
}

fn parse_pair(s: &str) -> Option<(u32, u32)> {
    let (left, right) = s.split_once(':')?;
    Some((left.parse().ok()?, right.parse().ok()?))
}
