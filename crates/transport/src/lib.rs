//! Raw connection transports for the shoal network.
//!
//! - [`Transport`] / [`Listener`] - the dial/listen seam under the scheduler
//! - [`TransportRegistry`] - ordered first-match-wins transport selection
//! - [`TcpReuseTransport`] - TCP with listener port reuse
//! - [`UtpTransport`] - uTP over one shared UDP socket
//! - [`GenericTransport`] - per-dial socket fallback
//! - [`Dialer`] - transport selection plus local-address choice

use shoal_multiaddr::{Multiaddr, IP4, IP6, TCP, UTP};

mod conn;
mod dial;
mod error;
mod generic;
mod metered;
mod registry;
mod tcp;
mod utp;

pub use conn::{BoxedConn, RawConn, StreamConn};
pub use dial::{pick_local_addr, Dialer};
pub use error::TransportError;
pub use generic::GenericTransport;
pub use metered::{BandwidthCounters, MeteredConn};
pub use registry::{Listener, Transport, TransportRegistry};
pub use tcp::TcpReuseTransport;
pub use utp::{UtpStream, UtpTransport};

/// True iff the address stack is exactly `{ip4|ip6, tcp}`.
pub fn is_tcp_addr(addr: &Multiaddr) -> bool {
    let codes: Vec<u32> = addr.codes().collect();
    matches!(codes.as_slice(), [ip, TCP] if *ip == IP4 || *ip == IP6)
}

/// True iff the address stack ends in `utp`.
pub fn is_utp_addr(addr: &Multiaddr) -> bool {
    addr.codes().last() == Some(UTP)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn tcp_classification() {
        assert!(is_tcp_addr(&addr("/ip4/1.2.3.4/tcp/1")));
        assert!(is_tcp_addr(&addr("/ip6/::1/tcp/1")));
        assert!(!is_tcp_addr(&addr("/ip4/1.2.3.4/udp/1/utp")));
    }

    #[test]
    fn utp_classification() {
        assert!(is_utp_addr(&addr("/ip4/1.2.3.4/udp/1/utp")));
        assert!(!is_utp_addr(&addr("/ip4/1.2.3.4/tcp/1")));
        assert!(!is_utp_addr(&addr("/ip4/1.2.3.4/udp/1")));
    }
}
