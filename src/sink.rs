//! Where finished datagrams go: a raw IPv4 socket or a capture file.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap_parser::{LegacyPcapBlock, Linktype, PcapHeader, ToVec};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info, warn};

use crate::error::{PacketError, TransmissionError};
use crate::net::Datagram;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_SNAPLEN: u32 = 65535;

pub trait PacketSink {
    /// Hands one finished datagram over, returning the number of bytes written.
    fn send(&mut self, datagram: &Datagram) -> Result<usize, PacketError>;
}

/// Raw IPv4 socket with `IP_HDRINCL`, so the kernel transmits our header as is.
pub struct RawSocketSink {
    socket: Socket,
}

impl RawSocketSink {
    pub fn open() -> Result<Self, PacketError> {
        // SAFETY: geteuid has no preconditions and cannot fail.
        if unsafe { libc::geteuid() } != 0 {
            warn!("not running as root, opening a raw socket will likely fail");
        }

        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::TCP))
            .map_err(TransmissionError::Open)?;
        socket
            .set_header_included_v4(true)
            .map_err(TransmissionError::Open)?;
        socket
            .set_write_timeout(Some(SEND_TIMEOUT))
            .map_err(TransmissionError::Open)?;
        debug!("raw socket ready with IP_HDRINCL");

        Ok(RawSocketSink { socket })
    }
}

impl PacketSink for RawSocketSink {
    fn send(&mut self, datagram: &Datagram) -> Result<usize, PacketError> {
        // The port is ignored for raw sockets; the address picks the route.
        let destination = SockAddr::from(SocketAddr::new(
            IpAddr::V4(datagram.destination_address()),
            0,
        ));

        let written = self
            .socket
            .send_to(datagram.as_bytes(), &destination)
            .map_err(TransmissionError::Send)?;
        if written != datagram.len() {
            return Err(TransmissionError::ShortSend {
                written,
                len: datagram.len(),
            }
            .into());
        }

        info!(
            bytes = written,
            destination = %datagram.destination_address(),
            port = datagram.destination_port(),
            flags = %datagram.tcp_flags(),
            "sent datagram"
        );
        Ok(written)
    }
}

/// Opens a raw socket, sends one datagram and closes the socket again on every path.
pub fn send_once(datagram: &Datagram) -> Result<usize, PacketError> {
    let mut sink = RawSocketSink::open()?;
    sink.send(datagram)
}

/// Appends datagrams to a pcap capture file with raw IPv4 link type.
pub struct PcapFileSink<W: Write> {
    writer: W,
}

impl PcapFileSink<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PacketError> {
        let file = File::create(path.as_ref()).map_err(TransmissionError::Capture)?;
        info!(path = %path.as_ref().display(), "writing capture file");
        PcapFileSink::new(BufWriter::new(file))
    }
}

impl<W: Write> PcapFileSink<W> {
    pub fn new(mut writer: W) -> Result<Self, PacketError> {
        // LINKTYPE_RAW: each record starts at the IPv4 header.
        let mut header = PcapHeader {
            magic_number: PCAP_MAGIC,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: PCAP_SNAPLEN,
            network: Linktype::RAW,
        };
        let bytes = header.to_vec().map_err(serialize_error)?;

        writer.write_all(&bytes).map_err(TransmissionError::Capture)?;
        Ok(PcapFileSink { writer })
    }

    pub fn into_inner(mut self) -> Result<W, PacketError> {
        self.writer.flush().map_err(TransmissionError::Capture)?;
        Ok(self.writer)
    }
}

impl<W: Write> PacketSink for PcapFileSink<W> {
    fn send(&mut self, datagram: &Datagram) -> Result<usize, PacketError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut block = LegacyPcapBlock {
            ts_sec: now.as_secs() as u32,
            ts_usec: now.subsec_micros(),
            caplen: datagram.len() as u32,
            origlen: datagram.len() as u32,
            data: datagram.as_bytes(),
        };
        let record = block.to_vec().map_err(serialize_error)?;

        self.writer
            .write_all(&record)
            .and_then(|_| self.writer.flush())
            .map_err(TransmissionError::Capture)?;
        Ok(datagram.len())
    }
}

fn serialize_error<E: fmt::Debug>(e: E) -> TransmissionError {
    TransmissionError::Capture(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{:?}", e),
    ))
}
