//! Hand-crafted IPv4/TCP datagrams: option encoding, header layout and RFC 1071 checksums.

pub mod error;
pub mod hextools;
pub mod net;
pub mod probes;
pub mod sink;

pub use error::PacketError;
pub use net::{Datagram, Ipv4Header, Segment, TcpFlags, TcpHeader, TcpOption};
