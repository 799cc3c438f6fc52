//! Layered, self-describing network addresses.
//!
//! A [`Multiaddr`] is an ordered stack of protocol layers such as
//! `/ip4/203.0.113.7/tcp/1634` or `/ip4/203.0.113.7/udp/1634/utp`, optionally
//! terminated with an `/ipfs/<base58-peer-id>` layer. Well-formed addresses
//! always begin with an IP layer.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

mod protocol;

pub use protocol::{Protocol, IP4, IP6, IPFS, TCP, UDP, UTP};

/// Errors produced while parsing a multiaddress.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    #[error("multiaddr must begin with '/'")]
    MissingLeadingSlash,
    #[error("multiaddr must not be empty")]
    Empty,
    #[error("multiaddr must begin with an ip layer")]
    MissingIpLayer,
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("protocol {0} requires a value")]
    MissingValue(String),
    #[error("invalid {0} value: {1}")]
    InvalidValue(String, String),
}

/// An ordered sequence of protocol layers.
///
/// Equality and hashing are structural; ordering compares the canonical
/// binary encoding byte-wise.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Multiaddr {
    protocols: Vec<Protocol>,
}

impl Multiaddr {
    /// An address for a TCP endpoint.
    pub fn from_tcp(addr: SocketAddr) -> Self {
        Self {
            protocols: vec![ip_protocol(addr.ip()), Protocol::Tcp(addr.port())],
        }
    }

    /// An address for a uTP endpoint (UDP layer plus the utp marker).
    pub fn from_utp(addr: SocketAddr) -> Self {
        Self {
            protocols: vec![
                ip_protocol(addr.ip()),
                Protocol::Udp(addr.port()),
                Protocol::Utp,
            ],
        }
    }

    /// The protocol layers, outermost first.
    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// The numeric protocol codes, outermost first.
    pub fn codes(&self) -> impl Iterator<Item = u32> + '_ {
        self.protocols.iter().map(Protocol::code)
    }

    /// Append a layer, returning the extended address.
    pub fn with(mut self, protocol: Protocol) -> Self {
        self.protocols.push(protocol);
        self
    }

    /// Split off the first layer. Returns `None` on an empty address.
    pub fn split_first(&self) -> Option<(Multiaddr, Multiaddr)> {
        let (head, tail) = self.protocols.split_first()?;
        Some((
            Multiaddr {
                protocols: vec![head.clone()],
            },
            Multiaddr {
                protocols: tail.to_vec(),
            },
        ))
    }

    /// True iff both addresses carry the same protocol codes in the same
    /// order. Values are not compared.
    pub fn protocols_match(&self, other: &Multiaddr) -> bool {
        self.protocols.len() == other.protocols.len()
            && self.codes().eq(other.codes())
    }

    /// The IP layer value, if the address starts with one.
    pub fn ip(&self) -> Option<IpAddr> {
        match self.protocols.first()? {
            Protocol::Ip4(ip) => Some(IpAddr::V4(*ip)),
            Protocol::Ip6(ip) => Some(IpAddr::V6(*ip)),
            _ => None,
        }
    }

    /// The TCP port, if the address has a TCP layer.
    pub fn tcp_port(&self) -> Option<u16> {
        self.protocols.iter().find_map(|p| match p {
            Protocol::Tcp(port) => Some(*port),
            _ => None,
        })
    }

    /// The UDP port, if the address has a UDP layer.
    pub fn udp_port(&self) -> Option<u16> {
        self.protocols.iter().find_map(|p| match p {
            Protocol::Udp(port) => Some(*port),
            _ => None,
        })
    }

    /// The peer identifier bytes of a trailing `/ipfs` layer.
    pub fn peer_id_bytes(&self) -> Option<&[u8]> {
        match self.protocols.last()? {
            Protocol::Ipfs(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The address with any trailing `/ipfs` layer removed.
    pub fn without_peer_id(&self) -> Multiaddr {
        let mut protocols = self.protocols.clone();
        if matches!(protocols.last(), Some(Protocol::Ipfs(_))) {
            protocols.pop();
        }
        Multiaddr { protocols }
    }

    /// Convert to a socket address using the IP layer and the first port
    /// layer (TCP or UDP).
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let ip = self.ip()?;
        let port = self.protocols.iter().find_map(|p| match p {
            Protocol::Tcp(port) | Protocol::Udp(port) => Some(*port),
            _ => None,
        })?;
        Some(SocketAddr::new(ip, port))
    }

    /// True iff the IP layer is a loopback address.
    pub fn is_loopback(&self) -> bool {
        self.ip().is_some_and(|ip| ip.is_loopback())
    }

    /// True iff the IP layer is unspecified (`0.0.0.0` or `::`).
    pub fn is_unspecified(&self) -> bool {
        self.ip().is_some_and(|ip| ip.is_unspecified())
    }

    /// True iff the IP layer is an IPv6 link-local address (`fe80::/10`).
    pub fn is_ip6_link_local(&self) -> bool {
        match self.ip() {
            Some(IpAddr::V6(ip)) => (ip.segments()[0] & 0xffc0) == 0xfe80,
            _ => false,
        }
    }

    /// Canonical binary encoding (varint protocol codes followed by values).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.protocols.len() * 8);
        for protocol in &self.protocols {
            protocol.write_bytes(&mut out);
        }
        out
    }
}

fn ip_protocol(ip: IpAddr) -> Protocol {
    match ip {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    }
}

impl PartialOrd for Multiaddr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Multiaddr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl FromStr for Multiaddr {
    type Err = AddrError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = input.split('/');
        if parts.next() != Some("") {
            return Err(AddrError::MissingLeadingSlash);
        }

        let mut protocols = Vec::new();
        while let Some(name) = parts.next() {
            if name.is_empty() {
                continue;
            }
            // `from_str_parts` consumes value segments from the same iterator.
            let protocol = Protocol::from_str_parts(name, &mut parts)?;
            protocols.push(protocol);
        }

        if protocols.is_empty() {
            return Err(AddrError::Empty);
        }
        if !protocols[0].is_ip() {
            return Err(AddrError::MissingIpLayer);
        }

        Ok(Multiaddr { protocols })
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for protocol in &self.protocols {
            fmt::Display::fmt(protocol, f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromIterator<Protocol> for Multiaddr {
    fn from_iter<T: IntoIterator<Item = Protocol>>(iter: T) -> Self {
        Multiaddr {
            protocols: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stringify_parse_round_trip() {
        let peer_id = bs58::encode([7u8; 32]).into_string();
        let cases = [
            "/ip4/1.2.3.4/tcp/1".to_string(),
            "/ip6/::1/tcp/65535".to_string(),
            "/ip4/10.0.0.1/udp/9999/utp".to_string(),
            format!("/ip4/10.0.0.1/tcp/1/ipfs/{peer_id}"),
        ];

        for case in &cases {
            let parsed: Multiaddr = case.parse().unwrap();
            let reparsed: Multiaddr = parsed.to_string().parse().unwrap();
            assert_eq!(parsed, reparsed, "{case}");
            assert_eq!(&parsed.to_string(), case);
        }
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(
            "ip4/1.2.3.4/tcp/1".parse::<Multiaddr>(),
            Err(AddrError::MissingLeadingSlash)
        );
        assert_eq!("/".parse::<Multiaddr>(), Err(AddrError::Empty));
        assert_eq!(
            "/tcp/80".parse::<Multiaddr>(),
            Err(AddrError::MissingIpLayer)
        );
        assert!(matches!(
            "/ip4/1.2.3.4/tcp/banana".parse::<Multiaddr>(),
            Err(AddrError::InvalidValue(..))
        ));
        assert!(matches!(
            "/ip4/1.2.3.4/quic/1".parse::<Multiaddr>(),
            Err(AddrError::UnknownProtocol(..))
        ));
    }

    #[test]
    fn split_and_protocols() {
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/4001/utp".parse().unwrap();
        let codes: Vec<u32> = addr.codes().collect();
        assert_eq!(codes, vec![IP4, UDP, UTP]);

        let (head, tail) = addr.split_first().unwrap();
        assert_eq!(head.to_string(), "/ip4/127.0.0.1");
        assert_eq!(tail.to_string(), "/udp/4001/utp");
    }

    #[test]
    fn protocol_compatibility_ignores_values() {
        let a: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let b: Multiaddr = "/ip4/8.8.8.8/tcp/9999".parse().unwrap();
        let c: Multiaddr = "/ip4/127.0.0.1/udp/1/utp".parse().unwrap();
        let d: Multiaddr = "/ip6/::1/tcp/1".parse().unwrap();

        assert!(a.protocols_match(&b));
        assert!(!a.protocols_match(&c));
        assert!(!a.protocols_match(&d));
    }

    #[test]
    fn socket_addr_round_trip() {
        let sa: SocketAddr = "127.0.0.1:1634".parse().unwrap();
        let addr = Multiaddr::from_tcp(sa);
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/1634");
        assert_eq!(addr.to_socket_addr(), Some(sa));

        let utp = Multiaddr::from_utp(sa);
        assert_eq!(utp.to_string(), "/ip4/127.0.0.1/udp/1634/utp");
        assert_eq!(utp.to_socket_addr(), Some(sa));
    }

    #[test]
    fn classification() {
        let lo: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        assert!(lo.is_loopback());
        assert!(!lo.is_unspecified());

        let unspec: Multiaddr = "/ip4/0.0.0.0/tcp/1".parse().unwrap();
        assert!(unspec.is_unspecified());

        let ll: Multiaddr = "/ip6/fe80::1/tcp/1".parse().unwrap();
        assert!(ll.is_ip6_link_local());
        let not_ll: Multiaddr = "/ip6/2001:db8::1/tcp/1".parse().unwrap();
        assert!(!not_ll.is_ip6_link_local());
    }

    #[test]
    fn byte_ordering_is_total() {
        let a: Multiaddr = "/ip4/1.2.3.4/tcp/1".parse().unwrap();
        let b: Multiaddr = "/ip4/1.2.3.5/tcp/1".parse().unwrap();
        assert!(a < b);
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }

    #[test]
    fn peer_id_layer() {
        let bytes = [9u8; 32];
        let addr: Multiaddr = "/ip4/1.2.3.4/tcp/1".parse::<Multiaddr>().unwrap()
            .with(Protocol::Ipfs(bytes.to_vec()));
        assert_eq!(addr.peer_id_bytes(), Some(&bytes[..]));
        assert_eq!(addr.without_peer_id().to_string(), "/ip4/1.2.3.4/tcp/1");
    }
}
