use std::fmt::Write;

use crate::error::ValidationError;
use crate::net::Datagram;

const BYTES_PER_ROW: usize = 16;
const HALF_ROW_WIDTH: usize = 23;

pub fn format_hexdump(data: &[u8]) -> String {
    format_hexdump_at(data, 0)
}

/// Hexdump of a slice cut from a larger buffer. The address column counts from `base`,
/// the slice's offset in that buffer, so a TCP segment dump lines up with the datagram.
pub fn format_hexdump_at(data: &[u8], base: usize) -> String {
    let mut result = String::new();

    for (row, chunk) in data.chunks(BYTES_PER_ROW).enumerate() {
        let (left, right) = chunk.split_at(chunk.len().min(BYTES_PER_ROW / 2));
        let ascii: String = chunk
            .iter()
            .map(|&byte| if byte.is_ascii_graphic() { byte as char } else { '.' })
            .collect();

        // Short rows are padded so the ASCII column stays aligned.
        result.push_str(&format!(
            "0x{:04x}:  {:<width$}  {:<width$}  {}\n",
            base + row * BYTES_PER_ROW,
            format_hex(left),
            format_hex(right),
            ascii,
            width = HALF_ROW_WIDTH
        ));
    }

    result
}

/// Space separated hex bytes, as printed for a raw header slice.
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses hex text, ignoring whitespace and an optional `0x` prefix.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, ValidationError> {
    let trimmed = text.trim();
    let digits: String = trimmed
        .strip_prefix("0x")
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    hex::decode(&digits).map_err(|_| ValidationError::InvalidArgument(text.to_string()))
}

/// Human-readable breakdown of every header field, read through the datagram accessors.
pub fn describe_datagram(datagram: &Datagram) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "###[ IP ]###");
    let _ = writeln!(out, "  version   = {}", datagram.version());
    let _ = writeln!(out, "  ihl       = {}", datagram.ihl());
    let _ = writeln!(out, "  dscp      = {}", datagram.dscp());
    let _ = writeln!(out, "  ecn       = {}", datagram.ecn());
    let _ = writeln!(out, "  len       = {}", datagram.total_length());
    let _ = writeln!(out, "  id        = {}", datagram.identification());
    let _ = writeln!(out, "  flags     = {:#05b}", datagram.ip_flags());
    let _ = writeln!(out, "  frag      = {}", datagram.frag_offset());
    let _ = writeln!(out, "  ttl       = {}", datagram.ttl());
    let _ = writeln!(out, "  proto     = {}", datagram.protocol());
    let _ = writeln!(out, "  chksum    = {:#06x}", datagram.ip_checksum());
    let _ = writeln!(out, "  src       = {}", datagram.source_address());
    let _ = writeln!(out, "  dst       = {}", datagram.destination_address());
    if !datagram.ip_options().is_empty() {
        let _ = writeln!(out, "  options   = {}", format_hex(datagram.ip_options()));
    }

    let _ = writeln!(out, "###[ TCP ]###");
    let _ = writeln!(out, "  sport     = {}", datagram.source_port());
    let _ = writeln!(out, "  dport     = {}", datagram.destination_port());
    let _ = writeln!(out, "  seq       = {}", datagram.sequence_number());
    let _ = writeln!(out, "  ack       = {}", datagram.ack_number());
    let _ = writeln!(out, "  dataofs   = {}", datagram.data_offset());
    let _ = writeln!(out, "  reserved  = {}", datagram.tcp_reserved());
    let _ = writeln!(out, "  flags     = {}", datagram.tcp_flags());
    let _ = writeln!(out, "  window    = {}", datagram.window());
    let _ = writeln!(out, "  chksum    = {:#06x}", datagram.tcp_checksum());
    let _ = writeln!(out, "  urgptr    = {}", datagram.urgent_pointer());
    match datagram.options() {
        Ok(options) => {
            let rendered: Vec<String> = options.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "  options   = [{}]", rendered.join(", "));
        }
        Err(e) => {
            let _ = writeln!(out, "  options   = <{}>", e);
        }
    }

    if !datagram.payload().is_empty() {
        let _ = writeln!(out, "###[ Raw ]###");
        let _ = writeln!(out, "  load      = {:?}", String::from_utf8_lossy(datagram.payload()));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Ipv4Header, Segment, TcpHeader, TcpOption};
    use std::net::Ipv4Addr;

    #[test]
    fn test_format_hexdump() {
        let dump = format_hexdump(b"Custom payload data");
        assert_eq!(
            dump,
            "0x0000:  43 75 73 74 6f 6d 20 70  61 79 6c 6f 61 64 20 64  Custom.payload.d\n\
             0x0010:  61 74 61                                          ata\n"
        );
    }

    #[test]
    fn test_format_hexdump_at_offset() {
        let dump = format_hexdump_at(b"Custom payload data", 20);
        assert_eq!(
            dump,
            "0x0014:  43 75 73 74 6f 6d 20 70  61 79 6c 6f 61 64 20 64  Custom.payload.d\n\
             0x0024:  61 74 61                                          ata\n"
        );

        // A row of exactly eight bytes leaves the right half blank.
        let eight = format_hexdump_at(&[0x41; 8], 0x100);
        let expected = format!("0x0100:  41 41 41 41 41 41 41 41  {}  AAAAAAAA\n", " ".repeat(23));
        assert_eq!(eight, expected);

        assert!(format_hexdump_at(&[], 20).is_empty());
    }

    #[test]
    fn test_format_and_parse_hex() {
        assert_eq!(format_hex(&[0x00, 0x50, 0xa0]), "00 50 a0");
        assert_eq!(parse_hex("0x0050 0035\n a002"), Ok(vec![0x00, 0x50, 0x00, 0x35, 0xa0, 0x02]));
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_describe_datagram() {
        let datagram = Segment::new(
            Ipv4Header::new(Ipv4Addr::new(10, 36, 50, 214), Ipv4Addr::new(10, 36, 50, 148)),
            TcpHeader::syn(80, 53),
        )
        .with_options(vec![TcpOption::MaxSegmentSize(1460)])
        .with_payload("hi")
        .build()
        .unwrap();

        let text = describe_datagram(&datagram);
        assert!(text.contains("  src       = 10.36.50.214\n"));
        assert!(text.contains("  dataofs   = 6\n"));
        assert!(text.contains("  flags     = S\n"));
        assert!(text.contains("  options   = [MSS(1460)]\n"));
        assert!(text.contains("  load      = \"hi\"\n"));
    }
}
