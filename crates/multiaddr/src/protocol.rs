//! Individual layers of a multiaddress.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::AddrError;

/// Protocol code for `/ip4`.
pub const IP4: u32 = 0x04;
/// Protocol code for `/tcp`.
pub const TCP: u32 = 0x06;
/// Protocol code for `/udp`.
pub const UDP: u32 = 0x0111;
/// Protocol code for `/ip6`.
pub const IP6: u32 = 0x29;
/// Protocol code for `/utp`.
pub const UTP: u32 = 0x012e;
/// Protocol code for `/ipfs`.
pub const IPFS: u32 = 0x01a5;

/// One `(protocol, value)` layer of a [`Multiaddr`](crate::Multiaddr).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Tcp(u16),
    Udp(u16),
    Utp,
    /// Raw peer identifier bytes (rendered base58 on the wire format).
    Ipfs(Vec<u8>),
}

impl Protocol {
    /// The numeric multiaddr protocol code.
    pub fn code(&self) -> u32 {
        match self {
            Protocol::Ip4(_) => IP4,
            Protocol::Ip6(_) => IP6,
            Protocol::Tcp(_) => TCP,
            Protocol::Udp(_) => UDP,
            Protocol::Utp => UTP,
            Protocol::Ipfs(_) => IPFS,
        }
    }

    /// The protocol name as it appears in the string format.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Ip4(_) => "ip4",
            Protocol::Ip6(_) => "ip6",
            Protocol::Tcp(_) => "tcp",
            Protocol::Udp(_) => "udp",
            Protocol::Utp => "utp",
            Protocol::Ipfs(_) => "ipfs",
        }
    }

    /// Whether this layer is an IP layer.
    pub fn is_ip(&self) -> bool {
        matches!(self, Protocol::Ip4(_) | Protocol::Ip6(_))
    }

    /// Parse one protocol from the string segment iterator. The protocol name
    /// has already been consumed into `name`; value segments (if any) are
    /// pulled from `parts`.
    pub(crate) fn from_str_parts<'a>(
        name: &str,
        parts: &mut impl Iterator<Item = &'a str>,
    ) -> Result<Self, AddrError> {
        let mut value = || {
            parts
                .next()
                .ok_or_else(|| AddrError::MissingValue(name.to_string()))
        };

        match name {
            "ip4" => {
                let v = value()?;
                let ip = Ipv4Addr::from_str(v)
                    .map_err(|_| AddrError::InvalidValue(name.to_string(), v.to_string()))?;
                Ok(Protocol::Ip4(ip))
            }
            "ip6" => {
                let v = value()?;
                let ip = Ipv6Addr::from_str(v)
                    .map_err(|_| AddrError::InvalidValue(name.to_string(), v.to_string()))?;
                Ok(Protocol::Ip6(ip))
            }
            "tcp" => {
                let v = value()?;
                let port = u16::from_str(v)
                    .map_err(|_| AddrError::InvalidValue(name.to_string(), v.to_string()))?;
                Ok(Protocol::Tcp(port))
            }
            "udp" => {
                let v = value()?;
                let port = u16::from_str(v)
                    .map_err(|_| AddrError::InvalidValue(name.to_string(), v.to_string()))?;
                Ok(Protocol::Udp(port))
            }
            "utp" => Ok(Protocol::Utp),
            "ipfs" => {
                let v = value()?;
                let bytes = bs58::decode(v)
                    .into_vec()
                    .map_err(|_| AddrError::InvalidValue(name.to_string(), v.to_string()))?;
                Ok(Protocol::Ipfs(bytes))
            }
            other => Err(AddrError::UnknownProtocol(other.to_string())),
        }
    }

    /// Append the canonical binary encoding (varint code followed by the
    /// value) to `out`.
    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        write_varint(out, self.code());
        match self {
            Protocol::Ip4(ip) => out.extend_from_slice(&ip.octets()),
            Protocol::Ip6(ip) => out.extend_from_slice(&ip.octets()),
            Protocol::Tcp(port) | Protocol::Udp(port) => {
                out.extend_from_slice(&port.to_be_bytes())
            }
            Protocol::Utp => {}
            Protocol::Ipfs(bytes) => {
                write_varint(out, bytes.len() as u32);
                out.extend_from_slice(bytes);
            }
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ip4(ip) => write!(f, "/ip4/{ip}"),
            Protocol::Ip6(ip) => write!(f, "/ip6/{ip}"),
            Protocol::Tcp(port) => write!(f, "/tcp/{port}"),
            Protocol::Udp(port) => write!(f, "/udp/{port}"),
            Protocol::Utp => write!(f, "/utp"),
            Protocol::Ipfs(bytes) => write!(f, "/ipfs/{}", bs58::encode(bytes).into_string()),
        }
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_canonical() {
        assert_eq!(Protocol::Ip4(Ipv4Addr::LOCALHOST).code(), 0x04);
        assert_eq!(Protocol::Tcp(80).code(), 0x06);
        assert_eq!(Protocol::Udp(80).code(), 0x0111);
        assert_eq!(Protocol::Utp.code(), 0x012e);
    }

    #[test]
    fn varint_encoding() {
        let mut out = Vec::new();
        write_varint(&mut out, 0x0111);
        assert_eq!(out, vec![0x91, 0x02]);

        out.clear();
        write_varint(&mut out, 0x04);
        assert_eq!(out, vec![0x04]);
    }
}
