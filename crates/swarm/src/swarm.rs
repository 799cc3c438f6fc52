//! The dial orchestrator: `dial`, `listen`, the pool, and lifecycle events.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use shoal_handshake::{PlaintextUpgrader, SecureConn, SecureUpgrader};
use shoal_multiaddr::Multiaddr;
use shoal_peer::{PeerId, Peerstore};
use shoal_transport::{
    is_tcp_addr, is_utp_addr, BandwidthCounters, Dialer, GenericTransport, Listener, RawConn,
    TcpReuseTransport, Transport, TransportError, TransportRegistry, UtpTransport,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::addrs::{filter_usable, subtract, Filters};
use crate::backoff::DialBackoff;
use crate::config::SwarmConfig;
use crate::error::{DialAttemptError, DialError, SwarmError};
use crate::events::{EventEmitter, Notifiee, SwarmEvent};
use crate::pool::{ConnId, Pool, PooledConn};
use crate::scheduler::AddrScheduler;
use crate::sync::DialSync;

/// Peer-to-peer connection manager.
///
/// `dial` establishes (or returns) an authenticated connection to a peer,
/// collapsing concurrent requests into a single attempt, suppressing known
/// dead peers, and racing candidate addresses under a global FD budget.
pub struct Swarm {
    local: PeerId,
    peerstore: Arc<dyn Peerstore>,
    registry: Arc<TransportRegistry>,
    dialer: Arc<Dialer>,
    upgrader: Arc<dyn SecureUpgrader>,
    scheduler: AddrScheduler,
    dial_sync: DialSync,
    backoff: DialBackoff,
    pool: Pool,
    filters: Arc<Filters>,
    bandwidth: Arc<BandwidthCounters>,
    notifiees: RwLock<Vec<Arc<dyn Notifiee>>>,
    events: EventEmitter,
    listeners: Mutex<Vec<Multiaddr>>,
    shutdown: CancellationToken,
    config: SwarmConfig,
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("local", &self.local)
            .field("listeners", &*self.listeners.lock())
            .finish()
    }
}

/// Releases the dial-sync slot when the inaugurated path exits, normally or
/// by cancellation.
struct DialSlotGuard<'a> {
    sync: &'a DialSync,
    peer: PeerId,
}

impl Drop for DialSlotGuard<'_> {
    fn drop(&mut self) {
        self.sync.release(self.peer);
    }
}

impl Swarm {
    /// Construct with an injected secure upgrader. Refuses to run without a
    /// private key in the peerstore unless `insecure_dials_allowed` is set.
    pub fn with_upgrader(
        local: PeerId,
        peerstore: Arc<dyn Peerstore>,
        upgrader: Arc<dyn SecureUpgrader>,
        config: SwarmConfig,
    ) -> Result<Arc<Self>, SwarmError> {
        if peerstore.priv_key(&local).is_none() && !config.insecure_dials_allowed {
            return Err(SwarmError::PrivateKeyRequired);
        }
        Ok(Self::build(local, peerstore, upgrader, config))
    }

    /// Construct in insecure mode: connections carry asserted, unverified
    /// peer identities. Test-only; requires `insecure_dials_allowed`.
    pub fn new(
        local: PeerId,
        peerstore: Arc<dyn Peerstore>,
        config: SwarmConfig,
    ) -> Result<Arc<Self>, SwarmError> {
        if !config.insecure_dials_allowed {
            return Err(SwarmError::PrivateKeyRequired);
        }
        let upgrader = Arc::new(PlaintextUpgrader::new(local));
        Ok(Self::build(local, peerstore, upgrader, config))
    }

    fn build(
        local: PeerId,
        peerstore: Arc<dyn Peerstore>,
        upgrader: Arc<dyn SecureUpgrader>,
        config: SwarmConfig,
    ) -> Arc<Self> {
        let registry = TransportRegistry::new();
        registry.set_fallback(Arc::new(GenericTransport::new()));

        let bandwidth = BandwidthCounters::new();
        let dialer = Arc::new(Dialer::new(registry.clone()).with_metrics(bandwidth.clone()));
        let filters = Arc::new(Filters::new());
        let scheduler = AddrScheduler::new(
            dialer.clone(),
            upgrader.clone(),
            filters.clone(),
            config.per_peer_dial_limit,
        );
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let events = EventEmitter::new(config.event_channel_capacity);
        let shutdown = CancellationToken::new();

        let swarm = Arc::new(Swarm {
            local,
            peerstore,
            registry,
            dialer,
            upgrader,
            scheduler,
            dial_sync: DialSync::default(),
            backoff: DialBackoff::default(),
            pool: Pool::new(closed_tx),
            filters,
            bandwidth,
            notifiees: RwLock::new(Vec::new()),
            events,
            listeners: Mutex::new(Vec::new()),
            shutdown: shutdown.clone(),
            config,
        });

        tokio::spawn(drain_closed(Arc::downgrade(&swarm), closed_rx, shutdown));
        swarm
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn peerstore(&self) -> &Arc<dyn Peerstore> {
        &self.peerstore
    }

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    pub fn filters(&self) -> &Arc<Filters> {
        &self.filters
    }

    pub fn bandwidth(&self) -> &Arc<BandwidthCounters> {
        &self.bandwidth
    }

    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listeners.lock().clone()
    }

    pub fn connections_to(&self, peer: &PeerId) -> Vec<Arc<PooledConn>> {
        self.pool.connections_to(peer)
    }

    pub fn conn_count(&self) -> usize {
        self.pool.conn_count()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    pub fn notify(&self, notifiee: Arc<dyn Notifiee>) {
        self.notifiees.write().push(notifiee);
    }

    pub fn stop_notify(&self, notifiee: &Arc<dyn Notifiee>) {
        self.notifiees
            .write()
            .retain(|n| !Arc::ptr_eq(n, notifiee));
    }

    fn notify_all(&self, f: impl Fn(&Arc<dyn Notifiee>)) {
        for notifiee in self.notifiees.read().iter() {
            f(notifiee);
        }
    }

    /// Connect to a peer, or return the pooled connection if one is live.
    pub async fn dial(&self, peer: PeerId) -> Result<Arc<PooledConn>, DialError> {
        self.dial_with_cancel(peer, CancellationToken::new()).await
    }

    /// `dial` with caller-controlled cancellation. Cancelling a waiting
    /// (non-inaugurated) caller does not cancel the in-flight dial.
    pub async fn dial_with_cancel(
        &self,
        peer: PeerId,
        cancel: CancellationToken,
    ) -> Result<Arc<PooledConn>, DialError> {
        if self.shutdown.is_cancelled() {
            return Err(DialError::Closed);
        }
        if peer == self.local {
            return Err(DialError::SelfDial);
        }

        // An open connection short-circuits everything.
        if let Some(conn) = self.pool.best_connection_to(&peer) {
            return Ok(conn);
        }

        let (inaugurated, waiter) = self.dial_sync.acquire(peer);
        if inaugurated {
            let _slot = DialSlotGuard {
                sync: &self.dial_sync,
                peer,
            };

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => Err(DialError::Closed),
                result = tokio::time::timeout(
                    self.config.dial_timeout,
                    self.dial_inaugurated(&cancel, peer),
                ) => result.unwrap_or(Err(DialError::Failed {
                    peer,
                    last: DialAttemptError::Timeout,
                })),
            };

            // Backoff bookkeeping must settle before the slot releases.
            match &result {
                Ok(_) => self.backoff.clear(peer),
                Err(err) => {
                    debug!(%peer, %err, "inaugurated dial failed, adding backoff");
                    self.backoff.add(peer);
                }
            }
            result
        } else {
            // Someone else is dialing. Fail fast if the peer is known dead.
            if self.backoff.backoff(&peer) {
                trace!(%peer, "peer in backoff, not waiting");
                return Err(DialError::Backoff);
            }

            tokio::select! {
                _ = cancel.cancelled() => Err(DialError::Cancelled),
                _ = self.shutdown.cancelled() => Err(DialError::Closed),
                _ = tokio::time::sleep(self.config.dial_timeout) => Err(DialError::Failed {
                    peer,
                    last: DialAttemptError::Timeout,
                }),
                _ = waiter.wait() => {
                    // The dial ended, or an incoming connection raced it.
                    self.pool.best_connection_to(&peer).ok_or(DialError::Failed {
                        peer,
                        last: DialAttemptError::NotEstablished,
                    })
                }
            }
        }
    }

    async fn dial_inaugurated(
        &self,
        cancel: &CancellationToken,
        peer: PeerId,
    ) -> Result<Arc<PooledConn>, DialError> {
        trace!(%peer, "inaugurated dial start");

        let addrs = filter_usable(self.peerstore.addrs(&peer));
        // Never dial our own advertised addresses.
        let addrs = subtract(addrs, &self.peerstore.addrs(&self.local));
        if addrs.is_empty() {
            return Err(DialError::NoAddresses);
        }

        let conn = self.scheduler.dial_addrs(cancel, peer, addrs).await?;
        Ok(self.install(conn))
    }

    /// Hand an upgraded connection to the pool and tell observers.
    pub(crate) fn install(&self, conn: SecureConn) -> Arc<PooledConn> {
        let pooled = self.pool.add(conn);
        debug!(
            peer = %pooled.remote_peer(),
            addr = %pooled.remote_addr(),
            "connection installed"
        );
        self.notify_all(|n| n.on_connected(&pooled));
        self.events.emit(SwarmEvent::Connected(pooled.clone()));
        pooled
    }

    /// Stand up a listener, register its transport for reuse-dialing, and
    /// start accepting.
    pub async fn listen(self: &Arc<Self>, addr: &Multiaddr) -> Result<Multiaddr, SwarmError> {
        let (transport, listener): (Arc<dyn Transport>, Arc<dyn Listener>) = if is_tcp_addr(addr)
        {
            let t = TcpReuseTransport::bind(addr).await?;
            (t.clone(), t)
        } else if is_utp_addr(addr) {
            let t = UtpTransport::bind(addr).await?;
            (t.clone(), t)
        } else {
            return Err(SwarmError::UnsupportedListenAddr(addr.clone()));
        };

        self.registry.register(transport);
        let local = listener.local_addr().clone();
        self.dialer.add_local_addr(local.clone());
        // Advertise the listen address so candidate filtering can subtract
        // our own addresses.
        self.peerstore.add_addr(self.local, local.clone());
        self.listeners.lock().push(local.clone());

        let cancel = self.shutdown.child_token();
        tokio::spawn(accept_loop(
            Arc::downgrade(self),
            listener,
            local.clone(),
            cancel,
        ));

        self.notify_all(|n| n.on_listen(&local));
        self.events.emit(SwarmEvent::Listen(local.clone()));
        debug!(%local, "swarm listening");
        Ok(local)
    }

    /// Close every listener, cancel in-flight dials, and drain the pool.
    pub async fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.registry.clear();
        self.listeners.lock().clear();

        for conn in self.pool.drain() {
            conn.close().await;
            self.notify_all(|n| n.on_disconnected(&conn));
            self.events.emit(SwarmEvent::Disconnected(conn.clone()));
        }
        debug!("swarm closed");
    }

    fn finish_close(&self, id: ConnId) {
        if let Some(conn) = self.pool.remove(id) {
            debug!(peer = %conn.remote_peer(), id = %id, "connection removed from pool");
            self.notify_all(|n| n.on_disconnected(&conn));
            self.events.emit(SwarmEvent::Disconnected(conn));
        }
    }
}

/// Removes closed connections from the pool exactly once each.
async fn drain_closed(
    swarm: Weak<Swarm>,
    mut closed_rx: mpsc::UnboundedReceiver<ConnId>,
    shutdown: CancellationToken,
) {
    loop {
        let id = tokio::select! {
            _ = shutdown.cancelled() => break,
            id = closed_rx.recv() => match id {
                Some(id) => id,
                None => break,
            },
        };
        let Some(swarm) = swarm.upgrade() else { break };
        swarm.finish_close(id);
    }
}

async fn accept_loop(
    swarm: Weak<Swarm>,
    listener: Arc<dyn Listener>,
    addr: Multiaddr,
    cancel: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(raw) => raw,
                Err(TransportError::ListenerClosed) => break,
                // These ARE errors; they may be killing the listener, so
                // keep them visible.
                Err(err) => {
                    warn!(%addr, %err, "listener accept error");
                    continue;
                }
            },
        };

        let Some(swarm_ref) = swarm.upgrade() else { break };
        if swarm_ref.filters.blocked(raw.remote_addr()) {
            debug!(remote = %raw.remote_addr(), "rejecting inbound from blocked address");
            continue;
        }
        let raw: shoal_transport::BoxedConn = Box::new(shoal_transport::MeteredConn::new(
            raw,
            swarm_ref.bandwidth.clone(),
        ));

        // Upgrade concurrently so a slow handshake cannot stall accepts.
        tokio::spawn(async move {
            match swarm_ref.upgrader.upgrade_inbound(raw).await {
                Ok(conn) => {
                    swarm_ref.install(conn);
                }
                Err(err) => debug!(%err, "inbound upgrade failed"),
            }
        });
    }

    if let Some(swarm) = swarm.upgrade() {
        swarm.notify_all(|n| n.on_listen_close(&addr));
        swarm.events.emit(SwarmEvent::ListenClose(addr.clone()));
    }
    trace!(%addr, "accept loop ended");
}
