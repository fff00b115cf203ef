// net.rs -- network addresses and UDP sockets
//
// Addresses arrive as text ("1.2.3.4", "1.2.3.4:44400", "[::1]:44400", ...)
// and must already be numeric: there is no DNS resolution in this library,
// a hostname is rejected. Sockets are plain non-blocking UDP sockets; all
// readiness handling happens in the System frame loop.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::str::FromStr;

use socket2::{Domain, Protocol, Socket as RawSocket, Type};
use thiserror::Error;

use crate::console::ConsoleRef;
use crate::qcommon::DEFAULT_PORT;

// =============================================================================
// NetworkAddress
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress(SocketAddr);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("illegal address syntax: `{0}`")]
    Malformed(String),
    #[error("`{0}` is not a numeric address; DNS resolution is not supported")]
    Unresolved(String),
}

impl NetworkAddress {
    pub fn new(address: SocketAddr) -> Self {
        Self(address)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn is_ipv4(&self) -> bool {
        self.0.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.0.is_ipv6()
    }

    pub fn from_ipv4_data(address_bytes: &[u8; 4], port_bytes: &[u8; 2]) -> Self {
        let ip = Ipv4Addr::from(*address_bytes);
        let port = u16::from_be_bytes(*port_bytes);
        Self(SocketAddr::new(IpAddr::V4(ip), port))
    }

    pub fn from_ipv6_data(address_bytes: &[u8; 16], port_bytes: &[u8; 2]) -> Self {
        let ip = Ipv6Addr::from(*address_bytes);
        let port = u16::from_be_bytes(*port_bytes);
        Self(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Hash for the server-list address table. Collisions are tolerated by
    /// the chained buckets, so the mixing only has to be cheap and stable.
    pub fn hash(&self) -> u32 {
        let mut hash: u32 = match self.0.ip() {
            IpAddr::V4(ip) => {
                let octets = ip.octets();
                octets.iter().fold(17u32, |h, &b| h.wrapping_mul(31).wrapping_add(b as u32))
            }
            IpAddr::V6(ip) => {
                let octets = ip.octets();
                octets.iter().fold(47u32, |h, &b| h.wrapping_mul(31).wrapping_add(b as u32))
            }
        };
        hash = hash.wrapping_mul(31).wrapping_add(self.0.port() as u32);
        hash
    }

    /// Parses the textual forms `A.B.C.D`, `A.B.C.D:PORT`, `X:X:...:X`,
    /// `[X:X:...:X]` and `[X:X:...:X]:PORT`. The port defaults to 44400.
    pub fn parse(string: &str) -> Result<Self, AddressParseError> {
        let opening_brackets = string.bytes().filter(|&b| b == b'[').count();
        let closing_brackets = string.bytes().filter(|&b| b == b']').count();

        if opening_brackets > 1 || closing_brackets > 1 || opening_brackets != closing_brackets {
            return Err(AddressParseError::Malformed(string.to_string()));
        }

        if opening_brackets == 0 {
            return Self::parse_unbracketed(string);
        }

        let (Some(open), Some(close)) = (string.find('['), string.find(']')) else {
            return Err(AddressParseError::Malformed(string.to_string()));
        };
        if open >= close || open != 0 {
            return Err(AddressParseError::Malformed(string.to_string()));
        }

        let inner = &string[open + 1..close];
        let tail = &string[close + 1..];

        if tail.is_empty() {
            return Self::parse_ipv6(inner, DEFAULT_PORT, string);
        }

        if let Some(port_text) = tail.strip_prefix(':') {
            let port = parse_port(port_text).ok_or_else(|| AddressParseError::Malformed(string.to_string()))?;
            return Self::parse_ipv6(inner, port, string);
        }

        Err(AddressParseError::Malformed(string.to_string()))
    }

    fn parse_unbracketed(string: &str) -> Result<Self, AddressParseError> {
        // A plain IPv4 address without a port
        if let Ok(ip) = Ipv4Addr::from_str(string) {
            return Ok(Self(SocketAddr::new(IpAddr::V4(ip), DEFAULT_PORT)));
        }

        // An IPv4 address followed by a port
        if let Some((host, port_text)) = string.rsplit_once(':') {
            if let Some(port) = parse_port(port_text) {
                if let Ok(ip) = Ipv4Addr::from_str(host) {
                    return Ok(Self(SocketAddr::new(IpAddr::V4(ip), port)));
                }
            }
        }

        // A bare IPv6 address (no port form exists without brackets)
        if let Ok(ip) = Ipv6Addr::from_str(string) {
            return Ok(Self(SocketAddr::new(IpAddr::V6(ip), DEFAULT_PORT)));
        }

        Err(AddressParseError::Unresolved(string.to_string()))
    }

    fn parse_ipv6(inner: &str, port: u16, original: &str) -> Result<Self, AddressParseError> {
        match Ipv6Addr::from_str(inner) {
            Ok(ip) => Ok(Self(SocketAddr::new(IpAddr::V6(ip), port))),
            Err(_) => Err(AddressParseError::Unresolved(original.to_string())),
        }
    }
}

// Ports parse strictly: digits only, in 1..65535. The upper bound is
// exclusive, matching the engine this protocol comes from.
fn parse_port(text: &str) -> Option<u16> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let port: u32 = text.parse().ok()?;
    if port > 0 && port < u16::MAX as u32 {
        Some(port as u16)
    } else {
        None
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Socket
// =============================================================================

pub struct Socket {
    socket: UdpSocket,
    ipv4: bool,
}

impl Socket {
    /// Creates a non-blocking UDP socket of the requested family, bound to
    /// an ephemeral port.
    pub fn new(ipv4: bool, console: &ConsoleRef) -> Option<Socket> {
        match Self::try_new(ipv4) {
            Ok(socket) => Some(socket),
            Err(error) => {
                console.vprintf(format_args!("Socket::new(): cannot create a socket: {}\n", error));
                None
            }
        }
    }

    fn try_new(ipv4: bool) -> io::Result<Socket> {
        let domain = if ipv4 { Domain::IPV4 } else { Domain::IPV6 };
        let raw = RawSocket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_nonblocking(true)?;

        let bind_address: SocketAddr = if ipv4 {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        raw.bind(&bind_address.into())?;

        Ok(Socket { socket: raw.into(), ipv4 })
    }

    pub fn is_ipv4(&self) -> bool {
        self.ipv4
    }

    pub fn send_datagram(&self, address: &NetworkAddress, data: &[u8]) -> bool {
        self.socket.send_to(data, address.socket_addr()).is_ok()
    }

    /// Non-blocking receive. `Ok(None)` means nothing is pending.
    pub fn recv_datagram(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, NetworkAddress)>> {
        match self.socket.recv_from(buffer) {
            Ok((size, from)) => Ok(Some((size, NetworkAddress::new(from)))),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}
