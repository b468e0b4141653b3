pub mod checksum;
pub mod ip;
pub mod options;
pub mod segment;
pub mod tcp;

pub const TCP_PROTOCOL_NUM: u8 = 6;

pub use checksum::{
    check_tcp_checksum_v4, internet_checksum, verify_tcp_checksum, verify_tcp_checksum_v4,
    ChecksumCheck,
};
pub use ip::Ipv4Header;
pub use options::{decode_options, encode_options, TcpOption};
pub use segment::{build, Datagram, Segment};
pub use tcp::{TcpFlags, TcpHeader};
