//! Transport selection: an ordered registry scanned first-match-wins.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use shoal_multiaddr::Multiaddr;
use tracing::trace;

use crate::conn::BoxedConn;
use crate::error::TransportError;

/// A way of reaching remote addresses of a particular shape.
///
/// Transports are immutable after registration; dialing is `&self`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this transport can dial `addr`. The registry scans transports
    /// in registration order and uses the first match.
    fn matches(&self, addr: &Multiaddr) -> bool;

    /// Dial the remote address. `laddr` is a local-address hint; transports
    /// that support port reuse bind their dial to it.
    async fn dial(
        &self,
        raddr: &Multiaddr,
        laddr: Option<&Multiaddr>,
    ) -> Result<BoxedConn, TransportError>;
}

/// Accept side of a bound transport.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self) -> Result<BoxedConn, TransportError>;

    /// The resolved listen address (ports are concrete after bind).
    fn local_addr(&self) -> &Multiaddr;
}

/// Ordered list of transports; first `matches` wins. An optional fallback
/// is consulted only when no registered transport matches.
#[derive(Default)]
pub struct TransportRegistry {
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    fallback: RwLock<Option<Arc<dyn Transport>>>,
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("len", &self.transports.read().len())
            .finish()
    }
}

impl TransportRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, transport: Arc<dyn Transport>) {
        self.transports.write().push(transport);
    }

    /// Install the catch-all transport used when nothing else matches.
    pub fn set_fallback(&self, transport: Arc<dyn Transport>) {
        *self.fallback.write() = Some(transport);
    }

    /// Drop every registered transport (and the fallback).
    pub fn clear(&self) {
        self.transports.write().clear();
        self.fallback.write().take();
    }

    /// The first registered transport matching `addr`, or the fallback if it
    /// accepts the address.
    pub fn transport_for(&self, addr: &Multiaddr) -> Option<Arc<dyn Transport>> {
        if let Some(transport) = self
            .transports
            .read()
            .iter()
            .find(|t| t.matches(addr))
            .cloned()
        {
            return Some(transport);
        }
        self.fallback
            .read()
            .clone()
            .filter(|t| t.matches(addr))
    }

    /// Dial through the first matching transport.
    pub async fn dial(
        &self,
        raddr: &Multiaddr,
        laddr: Option<&Multiaddr>,
    ) -> Result<BoxedConn, TransportError> {
        let transport = self
            .transport_for(raddr)
            .ok_or_else(|| TransportError::NoTransport(raddr.clone()))?;
        trace!(%raddr, "dialing through registry");
        transport.dial(raddr, laddr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(bool);

    #[async_trait]
    impl Transport for Stub {
        fn matches(&self, _addr: &Multiaddr) -> bool {
            self.0
        }

        async fn dial(
            &self,
            raddr: &Multiaddr,
            _laddr: Option<&Multiaddr>,
        ) -> Result<BoxedConn, TransportError> {
            Err(TransportError::UnsupportedAddr(raddr.clone()))
        }
    }

    #[tokio::test]
    async fn first_match_wins() {
        let registry = TransportRegistry::new();
        registry.register(Arc::new(Stub(false)));
        registry.register(Arc::new(Stub(true)));

        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let found = registry.transport_for(&addr).unwrap();
        // Downcast-free check: the stub errors with UnsupportedAddr, so dial
        // resolves through the first matching entry.
        assert!(found.matches(&addr));
    }

    #[tokio::test]
    async fn no_transport_error() {
        let registry = TransportRegistry::new();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let err = registry.dial(&addr, None).await.err().expect("must fail");
        match err {
            TransportError::NoTransport(a) => assert_eq!(a, addr),
            other => panic!("expected NoTransport, got {other:?}"),
        }
    }
}
