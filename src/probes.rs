//! The fixed set of TCP probes used for OS fingerprinting.
//!
//! Each probe is a plain [`Segment`]; only flags and options differ between them.

use std::net::Ipv4Addr;

use rand::Rng;

use crate::error::PacketError;
use crate::net::{Datagram, Ipv4Header, Segment, TcpFlags, TcpHeader, TcpOption};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    Ecn,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 8] = [
        ProbeKind::T1,
        ProbeKind::T2,
        ProbeKind::T3,
        ProbeKind::T4,
        ProbeKind::T5,
        ProbeKind::T6,
        ProbeKind::T7,
        ProbeKind::Ecn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::T1 => "T1",
            ProbeKind::T2 => "T2",
            ProbeKind::T3 => "T3",
            ProbeKind::T4 => "T4",
            ProbeKind::T5 => "T5",
            ProbeKind::T6 => "T6",
            ProbeKind::T7 => "T7",
            ProbeKind::Ecn => "ECN",
        }
    }

    pub fn flags(self) -> TcpFlags {
        match self {
            ProbeKind::T1 | ProbeKind::T5 => TcpFlags::SYN,
            ProbeKind::T2 => TcpFlags::empty(),
            ProbeKind::T3 => TcpFlags::SYN | TcpFlags::FIN | TcpFlags::URG | TcpFlags::PSH,
            ProbeKind::T4 | ProbeKind::T6 => TcpFlags::ACK,
            ProbeKind::T7 => TcpFlags::FIN | TcpFlags::PSH | TcpFlags::URG,
            ProbeKind::Ecn => TcpFlags::SYN | TcpFlags::ECE | TcpFlags::CWR,
        }
    }

    /// Only T1 and ECN carry options.
    pub fn options(self) -> Vec<TcpOption> {
        match self {
            ProbeKind::T1 | ProbeKind::Ecn => vec![
                TcpOption::MaxSegmentSize(1460),
                TcpOption::WindowScale(10),
                TcpOption::NoOp,
                TcpOption::Timestamp(0xFFFFFFFF, 0),
                TcpOption::SackPermitted,
                TcpOption::EndOfList,
            ],
            _ => Vec::new(),
        }
    }
}

pub struct Probe {
    pub kind: ProbeKind,
    pub datagram: Datagram,
}

/// Builds probes between one fixed pair of endpoints.
#[derive(Debug, Clone)]
pub struct ProbeGenerator {
    pub source_ip: Ipv4Addr,
    pub destination_ip: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
}

impl ProbeGenerator {
    pub fn new(
        source_ip: Ipv4Addr,
        destination_ip: Ipv4Addr,
        source_port: u16,
        destination_port: u16,
    ) -> Self {
        ProbeGenerator {
            source_ip,
            destination_ip,
            source_port,
            destination_port,
        }
    }

    /// The segment for `kind`, with a fresh random IP identification.
    pub fn segment(&self, kind: ProbeKind) -> Segment {
        let ip = Ipv4Header {
            identification: rand::thread_rng().gen(),
            ..Ipv4Header::new(self.source_ip, self.destination_ip)
        };
        let tcp = TcpHeader {
            flags: kind.flags(),
            ..TcpHeader::new(self.source_port, self.destination_port)
        };

        Segment::new(ip, tcp).with_options(kind.options())
    }

    pub fn generate(&self, kind: ProbeKind) -> Result<Probe, PacketError> {
        Ok(Probe {
            kind,
            datagram: self.segment(kind).build()?,
        })
    }

    pub fn generate_all(&self) -> Result<Vec<Probe>, PacketError> {
        ProbeKind::ALL
            .iter()
            .map(|kind| self.generate(*kind))
            .collect()
    }
}
