use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::Packet;
use rand::Rng;
use tracing::{error, info};

use tcpcraft::error::{PacketError, ValidationError};
use tcpcraft::hextools::{
    describe_datagram, format_hex, format_hexdump, format_hexdump_at, parse_hex,
};
use tcpcraft::net::checksum::parse_address;
use tcpcraft::net::ip::{DEFAULT_TTL, FLAG_DONT_FRAGMENT};
use tcpcraft::net::tcp::DEFAULT_WINDOW;
use tcpcraft::net::{
    check_tcp_checksum_v4, Datagram, Ipv4Header, Segment, TcpFlags, TcpHeader, TcpOption,
};
use tcpcraft::probes::ProbeGenerator;
use tcpcraft::sink::{PacketSink, PcapFileSink, RawSocketSink};

const LOWEST_EPHEMERAL_PORT: u16 = 32768;

#[derive(Parser, Debug)]
#[command(name = "tcpcraft")]
#[command(about = "Build, checksum and send hand-crafted IPv4/TCP segments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build one segment from explicit field values
    Build(BuildArgs),
    /// Recompute and check the TCP checksum of raw bytes
    Verify(VerifyArgs),
    /// Build the OS fingerprinting probe set
    Probes(ProbeArgs),
}

#[derive(Args, Debug)]
struct Endpoints {
    /// Source IPv4 address
    #[arg(long, value_name = "ADDR")]
    src: Ipv4Addr,

    /// Destination IPv4 address
    #[arg(long, value_name = "ADDR")]
    dst: Ipv4Addr,

    /// Source port, random ephemeral port when omitted
    #[arg(long)]
    sport: Option<u16>,

    /// Destination port
    #[arg(long, default_value_t = 80)]
    dport: u16,
}

#[derive(Args, Debug)]
struct Output {
    /// Write the result to a pcap file
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Transmit through a raw socket (needs root)
    #[arg(long)]
    send: bool,
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[command(flatten)]
    endpoints: Endpoints,

    #[arg(long, default_value_t = 0)]
    seq: u32,

    #[arg(long, default_value_t = 0)]
    ack: u32,

    /// Flag letters, e.g. "S", "SA", "FPU"
    #[arg(long, default_value = "S")]
    flags: TcpFlags,

    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    window: u16,

    #[arg(long, default_value_t = 0)]
    urgent: u16,

    #[arg(long, default_value_t = DEFAULT_TTL)]
    ttl: u8,

    /// IP identification, random when omitted
    #[arg(long)]
    id: Option<u16>,

    /// Clear the Don't Fragment bit
    #[arg(long)]
    allow_fragment: bool,

    /// TCP option in wire order, repeatable: mss=1460, wscale=10, nop, eol, sackok,
    /// ts=VAL:ECR, sack=L:R[,L:R], kind=N:HEX
    #[arg(long = "option", value_name = "OPTION")]
    options: Vec<TcpOption>,

    /// Payload as text
    #[arg(long, default_value = "")]
    payload: String,

    #[command(flatten)]
    output: Output,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Raw bytes in hex
    hex: String,

    /// Source address; required unless --datagram
    #[arg(long, required_unless_present = "datagram")]
    src: Option<String>,

    /// Destination address; required unless --datagram
    #[arg(long, required_unless_present = "datagram")]
    dst: Option<String>,

    /// The bytes are a whole IPv4 datagram; addresses come from its header
    #[arg(long)]
    datagram: bool,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[command(flatten)]
    endpoints: Endpoints,

    #[command(flatten)]
    output: Output,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Build(args) => run_build(args),
        Command::Verify(args) => run_verify(args),
        Command::Probes(args) => run_probes(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn source_port(endpoints: &Endpoints) -> u16 {
    endpoints
        .sport
        .unwrap_or_else(|| rand::thread_rng().gen_range(LOWEST_EPHEMERAL_PORT..u16::MAX))
}

fn run_build(args: BuildArgs) -> Result<(), PacketError> {
    let ip = Ipv4Header {
        identification: args.id.unwrap_or_else(|| rand::thread_rng().gen()),
        flags: if args.allow_fragment { 0 } else { FLAG_DONT_FRAGMENT },
        ttl: args.ttl,
        ..Ipv4Header::new(args.endpoints.src, args.endpoints.dst)
    };
    let tcp = TcpHeader {
        sequence_number: args.seq,
        ack_number: args.ack,
        flags: args.flags,
        window: args.window,
        urgent_pointer: args.urgent,
        ..TcpHeader::new(source_port(&args.endpoints), args.endpoints.dport)
    };

    let datagram = Segment::new(ip, tcp)
        .with_options(args.options)
        .with_payload(args.payload)
        .build()?;

    print!("{}", describe_datagram(&datagram));
    println!("Raw packet bytes: {}", hex::encode(datagram.as_bytes()));
    println!("Raw TCP header bytes: {}", format_hex(datagram.tcp_header()));
    println!("IP header:");
    print!("{}", format_hexdump(datagram.ip_header()));
    println!("TCP segment:");
    print!(
        "{}",
        format_hexdump_at(datagram.tcp_segment(), datagram.ip_header().len())
    );

    deliver(&[datagram], &args.output)
}

fn run_verify(args: VerifyArgs) -> Result<(), PacketError> {
    let bytes = parse_hex(&args.hex)?;

    let (src, dst, segment) = if args.datagram {
        let packet = Ipv4Packet::new(&bytes)
            .ok_or(ValidationError::MalformedDatagram("shorter than an IPv4 header"))?;
        (packet.get_source(), packet.get_destination(), packet.payload().to_vec())
    } else {
        let src = parse_address(args.src.as_deref().unwrap_or_default())?;
        let dst = parse_address(args.dst.as_deref().unwrap_or_default())?;
        (src, dst, bytes)
    };

    let check = check_tcp_checksum_v4(&src, &dst, &segment)?;

    println!(
        "TCP checksum: {:#06x} (carried {:#06x})",
        check.computed, check.carried
    );
    if check.is_valid() {
        info!(%src, %dst, "checksum valid");
    } else {
        info!(%src, %dst, "checksum mismatch");
    }
    Ok(())
}

fn run_probes(args: ProbeArgs) -> Result<(), PacketError> {
    let generator = ProbeGenerator::new(
        args.endpoints.src,
        args.endpoints.dst,
        source_port(&args.endpoints),
        args.endpoints.dport,
    );

    let probes = generator.generate_all()?;
    for probe in &probes {
        println!(
            "Probe {}: {} bytes, flags {}, TCP header {}",
            probe.kind.name(),
            probe.datagram.len(),
            probe.datagram.tcp_flags(),
            format_hex(probe.datagram.tcp_header())
        );
    }

    let datagrams: Vec<Datagram> = probes.into_iter().map(|p| p.datagram).collect();
    deliver(&datagrams, &args.output)
}

fn deliver(datagrams: &[Datagram], output: &Output) -> Result<(), PacketError> {
    if let Some(path) = &output.out {
        let mut capture = PcapFileSink::create(path)?;
        for datagram in datagrams {
            capture.send(datagram)?;
        }
        capture.into_inner()?;
    }

    if output.send {
        let mut socket = RawSocketSink::open()?;
        for datagram in datagrams {
            socket.send(datagram)?;
        }
    }
    Ok(())
}
