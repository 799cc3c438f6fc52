//! Candidate-address filtering and dial ordering.

use std::cmp::Ordering;
use std::net::IpAddr;

use ipnet::IpNet;
use parking_lot::RwLock;
use shoal_multiaddr::Multiaddr;
use shoal_transport::{is_tcp_addr, is_utp_addr};

/// Whether every dial over this address consumes a file descriptor from the
/// global pool. Currently TCP.
pub(crate) fn is_fd_costly(addr: &Multiaddr) -> bool {
    is_tcp_addr(addr)
}

/// The default Docker bridge network. Addresses in it are rarely reachable
/// from outside the advertising host.
fn is_default_docker_range(addr: &Multiaddr) -> bool {
    match addr.ip() {
        Some(IpAddr::V4(ip)) => matches!(ip.octets(), [172, 17, _, _]),
        _ => false,
    }
}

/// Keep only addresses we can actually dial: a known transport stack with a
/// concrete (non-unspecified) IP.
pub(crate) fn filter_usable(addrs: Vec<Multiaddr>) -> Vec<Multiaddr> {
    addrs
        .into_iter()
        .filter(|a| (is_tcp_addr(a) || is_utp_addr(a)) && !a.is_unspecified())
        .collect()
}

/// `a` minus every address in `b`.
pub(crate) fn subtract(a: Vec<Multiaddr>, b: &[Multiaddr]) -> Vec<Multiaddr> {
    a.into_iter().filter(|addr| !b.contains(addr)).collect()
}

/// Total preorder over candidate addresses; ties resolve by raw byte
/// comparison of the address encoding.
pub(crate) fn cmp_addrs(a: &Multiaddr, b: &Multiaddr) -> Ordering {
    // Non-FD-costly first (free parallelism), then loopback (fails fastest),
    // with the default Docker range pushed last.
    let key = |addr: &Multiaddr| {
        (
            is_fd_costly(addr),
            !addr.is_loopback(),
            is_default_docker_range(addr),
        )
    };
    key(a).cmp(&key(b)).then_with(|| a.to_bytes().cmp(&b.to_bytes()))
}

/// Sort so preferred addresses are dialed sooner.
pub(crate) fn sort_addrs(addrs: &mut [Multiaddr]) {
    addrs.sort_by(cmp_addrs);
}

/// Blocked-address filter consulted before scheduling and on inbound
/// connections.
#[derive(Debug, Default)]
pub struct Filters {
    blocked: RwLock<Vec<IpNet>>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, net: IpNet) {
        self.blocked.write().push(net);
    }

    pub fn unblock(&self, net: &IpNet) {
        self.blocked.write().retain(|n| n != net);
    }

    /// True iff the address falls inside any blocked network.
    pub fn blocked(&self, addr: &Multiaddr) -> bool {
        let Some(ip) = addr.ip() else {
            return false;
        };
        self.blocked.read().iter().any(|net| net.contains(&ip))
    }
}
