//! Swarm events: observer trait plus a non-blocking broadcast emitter.

use std::sync::Arc;

use shoal_multiaddr::Multiaddr;
use tokio::sync::broadcast;

use crate::pool::PooledConn;

/// Lifecycle events emitted by the swarm.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    Listen(Multiaddr),
    ListenClose(Multiaddr),
    Connected(Arc<PooledConn>),
    Disconnected(Arc<PooledConn>),
}

/// Observer interface for swarm lifecycle changes. All methods default to
/// no-ops so implementors subscribe only to what they care about.
pub trait Notifiee: Send + Sync {
    fn on_listen(&self, _addr: &Multiaddr) {}
    fn on_listen_close(&self, _addr: &Multiaddr) {}
    fn on_connected(&self, _conn: &Arc<PooledConn>) {}
    fn on_disconnected(&self, _conn: &Arc<PooledConn>) {}
}

/// Non-blocking broadcast emitter. Slow subscribers drop events
/// independently.
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    tx: broadcast::Sender<SwarmEvent>,
}

impl EventEmitter {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn emit(&self, event: SwarmEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_broadcasts_to_all_subscribers() {
        let emitter = EventEmitter::new(8);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        emitter.emit(SwarmEvent::Listen(addr.clone()));

        match rx1.recv().await.unwrap() {
            SwarmEvent::Listen(a) => assert_eq!(a, addr),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(rx2.recv().await.unwrap(), SwarmEvent::Listen(_)));
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(8);
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        emitter.emit(SwarmEvent::ListenClose(addr));
    }
}
