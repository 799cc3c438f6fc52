//! Raw dialer: transport selection, local-address choice, optional metering.

use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use shoal_multiaddr::Multiaddr;
use tracing::trace;

use crate::conn::BoxedConn;
use crate::error::TransportError;
use crate::metered::{BandwidthCounters, MeteredConn};
use crate::registry::TransportRegistry;

/// Dials raw connections through the registry, binding to one of our own
/// listen addresses when the transport supports port reuse.
pub struct Dialer {
    registry: Arc<TransportRegistry>,
    local_addrs: RwLock<Vec<Multiaddr>>,
    counters: Option<Arc<BandwidthCounters>>,
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("local_addrs", &*self.local_addrs.read())
            .finish()
    }
}

impl Dialer {
    pub fn new(registry: Arc<TransportRegistry>) -> Self {
        Self {
            registry,
            local_addrs: RwLock::new(Vec::new()),
            counters: None,
        }
    }

    /// Wrap every dialed connection in a byte-counting layer.
    pub fn with_metrics(mut self, counters: Arc<BandwidthCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Record a listen address as a dial-out candidate.
    pub fn add_local_addr(&self, addr: Multiaddr) {
        self.local_addrs.write().push(addr);
    }

    pub fn local_addrs(&self) -> Vec<Multiaddr> {
        self.local_addrs.read().clone()
    }

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Dial `raddr` and return the raw connection. Transport errors are
    /// propagated, wrapped per address by the caller.
    pub async fn dial(&self, raddr: &Multiaddr) -> Result<BoxedConn, TransportError> {
        let laddr = pick_local_addr(&self.local_addrs.read(), raddr);
        trace!(%raddr, ?laddr, "raw dial");

        let conn = self.registry.dial(raddr, laddr.as_ref()).await?;
        Ok(match &self.counters {
            Some(counters) => Box::new(MeteredConn::new(conn, counters.clone())),
            None => conn,
        })
    }
}

/// Choose a local address to dial out from.
///
/// Keeps only candidates that are protocol-compatible with the remote and
/// whose scope can reach it (loopback dials only loopback, IPv6 link-local
/// only link-local). The survivor is picked uniformly at random: a naive
/// heuristic, but it spreads bad-address damage across retries.
pub fn pick_local_addr(laddrs: &[Multiaddr], raddr: &Multiaddr) -> Option<Multiaddr> {
    if laddrs.is_empty() {
        return None;
    }

    let raddr_is_loopback = raddr.is_loopback();
    let raddr_is_link_local = raddr.is_ip6_link_local();

    let candidates: Vec<&Multiaddr> = laddrs
        .iter()
        .filter(|l| l.protocols_match(raddr))
        .filter(|l| {
            if l.is_loopback() {
                return raddr_is_loopback;
            }
            if l.is_ip6_link_local() {
                return raddr_is_link_local;
            }
            true
        })
        .collect();

    candidates
        .choose(&mut rand::thread_rng())
        .map(|a| (*a).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn empty_candidates_mean_unbound_dial() {
        assert_eq!(pick_local_addr(&[], &addr("/ip4/8.8.8.8/tcp/1")), None);
    }

    #[test]
    fn loopback_only_dials_loopback() {
        let locals = vec![addr("/ip4/127.0.0.1/tcp/4001")];

        assert_eq!(
            pick_local_addr(&locals, &addr("/ip4/8.8.8.8/tcp/1")),
            None
        );
        assert_eq!(
            pick_local_addr(&locals, &addr("/ip4/127.0.0.1/tcp/1")),
            Some(addr("/ip4/127.0.0.1/tcp/4001"))
        );
    }

    #[test]
    fn link_local_only_dials_link_local() {
        let locals = vec![addr("/ip6/fe80::1/tcp/4001")];

        assert_eq!(
            pick_local_addr(&locals, &addr("/ip6/2001:db8::1/tcp/1")),
            None
        );
        assert_eq!(
            pick_local_addr(&locals, &addr("/ip6/fe80::2/tcp/1")),
            Some(addr("/ip6/fe80::1/tcp/4001"))
        );
    }

    #[test]
    fn incompatible_stacks_filtered() {
        let locals = vec![addr("/ip4/10.0.0.1/udp/4001/utp")];
        assert_eq!(pick_local_addr(&locals, &addr("/ip4/8.8.8.8/tcp/1")), None);

        let picked = pick_local_addr(&locals, &addr("/ip4/8.8.8.8/udp/1/utp"));
        assert_eq!(picked, Some(addr("/ip4/10.0.0.1/udp/4001/utp")));
    }
}
