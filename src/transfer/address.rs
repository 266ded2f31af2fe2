//! Data address encodings
//!
//! Legacy `h1,h2,h3,h4,p1,p2` (PORT/PASV) and RFC 2428 `|proto|addr|port|`
//! (EPRT/EPSV). Malformed input always comes back as a [`TransferError`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::TransferError;

/// Decode a PORT argument.
pub fn parse_port_argument(arg: &str) -> Result<SocketAddr, TransferError> {
    let octets = arg
        .trim()
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| TransferError::InvalidAddress(format!("bad number {part:?} in {arg}")))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    let [h1, h2, h3, h4, p1, p2] = octets[..] else {
        return Err(TransferError::InvalidAddress(format!(
            "expected 6 numbers, got {} in {arg}",
            octets.len()
        )));
    };
    let ip = Ipv4Addr::new(h1, h2, h3, h4);
    let port = u16::from_be_bytes([p1, p2]);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Encode an IPv4 address and port for a 227 reply.
pub fn format_pasv_address(ip: Ipv4Addr, port: u16) -> String {
    let [h1, h2, h3, h4] = ip.octets();
    let [p1, p2] = port.to_be_bytes();
    format!("{h1},{h2},{h3},{h4},{p1},{p2}")
}

/// Decode an EPRT argument. The first character is the delimiter.
pub fn parse_eprt_argument(arg: &str) -> Result<SocketAddr, TransferError> {
    let arg = arg.trim();
    let delimiter = arg
        .chars()
        .next()
        .ok_or_else(|| TransferError::InvalidAddress("empty EPRT argument".into()))?;
    if !(33..=126).contains(&(delimiter as u32)) {
        return Err(TransferError::InvalidAddress(format!("bad delimiter in {arg}")));
    }

    let fields: Vec<&str> = arg.split(delimiter).collect();
    // "|1|addr|port|" splits into ["", "1", "addr", "port", ""]
    let ["", proto, addr, port, ""] = fields[..] else {
        return Err(TransferError::InvalidAddress(format!("malformed EPRT argument {arg}")));
    };

    let ip: IpAddr = addr
        .parse()
        .map_err(|_| TransferError::InvalidAddress(format!("bad address {addr:?}")))?;
    match (proto, &ip) {
        ("1", IpAddr::V4(_)) | ("2", IpAddr::V6(_)) => {}
        ("1", _) | ("2", _) => {
            return Err(TransferError::InvalidAddress(format!(
                "address {addr} does not match protocol {proto}"
            )));
        }
        _ => return Err(TransferError::UnsupportedNetworkProtocol),
    }
    let port: u16 = port
        .parse()
        .map_err(|_| TransferError::InvalidAddress(format!("bad port {port:?}")))?;
    if port == 0 {
        return Err(TransferError::InvalidAddress("port 0".into()));
    }
    Ok(SocketAddr::new(ip, port))
}

/// Encode a socket address in RFC 2428 form.
pub fn format_eprt_address(addr: SocketAddr) -> String {
    let proto = match addr.ip() {
        IpAddr::V4(_) => 1,
        IpAddr::V6(_) => 2,
    };
    format!("|{proto}|{}|{}|", addr.ip(), addr.port())
}

/// Port-only form used in the 229 reply.
pub fn format_epsv_port(port: u16) -> String {
    format!("(|||{port}|)")
}

/// Decode the optional EPSV argument: `None`, `ALL`, or a network protocol.
pub fn parse_epsv_argument(arg: &str) -> Result<EpsvRequest, TransferError> {
    match arg.trim() {
        "" => Ok(EpsvRequest::Any),
        all if all.eq_ignore_ascii_case("ALL") => Ok(EpsvRequest::All),
        "1" => Ok(EpsvRequest::Protocol(1)),
        "2" => Ok(EpsvRequest::Protocol(2)),
        _ => Err(TransferError::UnsupportedNetworkProtocol),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpsvRequest {
    Any,
    All,
    Protocol(u8),
}
