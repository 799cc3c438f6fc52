//! The peer address book consumed by the dialer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use shoal_multiaddr::Multiaddr;

use crate::{PeerId, PrivateKey, PublicKey};

/// Read-mostly store of known peer addresses and key material.
///
/// The connection manager queries this read-only (`addrs`, `priv_key`);
/// discovery layers feed it via the `add_*` operations.
pub trait Peerstore: Send + Sync {
    /// All known addresses for a peer. Order is not significant.
    fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr>;

    fn add_addr(&self, peer: PeerId, addr: Multiaddr);

    fn add_addrs(&self, peer: PeerId, addrs: Vec<Multiaddr>) {
        for addr in addrs {
            self.add_addr(peer, addr);
        }
    }

    fn pub_key(&self, peer: &PeerId) -> Option<PublicKey>;

    fn priv_key(&self, peer: &PeerId) -> Option<PrivateKey>;

    fn add_pub_key(&self, peer: PeerId, key: PublicKey);

    fn add_priv_key(&self, peer: PeerId, key: PrivateKey);

    /// All peers with at least one record.
    fn peers(&self) -> Vec<PeerId>;
}

#[derive(Debug, Default)]
struct PeerRecord {
    addrs: Vec<Multiaddr>,
    pub_key: Option<PublicKey>,
    priv_key: Option<PrivateKey>,
}

/// In-memory peerstore (does not persist across restarts).
#[derive(Debug, Default)]
pub struct MemoryPeerstore {
    records: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl MemoryPeerstore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Peerstore for MemoryPeerstore {
    fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.records
            .read()
            .get(peer)
            .map(|record| record.addrs.clone())
            .unwrap_or_default()
    }

    fn add_addr(&self, peer: PeerId, addr: Multiaddr) {
        let mut records = self.records.write();
        let record = records.entry(peer).or_default();
        if !record.addrs.contains(&addr) {
            record.addrs.push(addr);
        }
    }

    fn pub_key(&self, peer: &PeerId) -> Option<PublicKey> {
        self.records.read().get(peer)?.pub_key.clone()
    }

    fn priv_key(&self, peer: &PeerId) -> Option<PrivateKey> {
        self.records.read().get(peer)?.priv_key.clone()
    }

    fn add_pub_key(&self, peer: PeerId, key: PublicKey) {
        self.records.write().entry(peer).or_default().pub_key = Some(key);
    }

    fn add_priv_key(&self, peer: PeerId, key: PrivateKey) {
        self.records.write().entry(peer).or_default().priv_key = Some(key);
    }

    fn peers(&self) -> Vec<PeerId> {
        self.records.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn addrs_deduplicate() {
        let store = MemoryPeerstore::new();
        let peer = PeerId::random();

        store.add_addr(peer, addr("/ip4/127.0.0.1/tcp/1634"));
        store.add_addr(peer, addr("/ip4/127.0.0.1/tcp/1634"));
        store.add_addr(peer, addr("/ip4/10.0.0.1/tcp/1634"));

        assert_eq!(store.addrs(&peer).len(), 2);
    }

    #[test]
    fn unknown_peer_has_no_addrs() {
        let store = MemoryPeerstore::new();
        assert!(store.addrs(&PeerId::random()).is_empty());
        assert!(store.priv_key(&PeerId::random()).is_none());
    }

    #[test]
    fn key_material_round_trip() {
        let store = MemoryPeerstore::new();
        let peer = PeerId::random();

        store.add_pub_key(peer, PublicKey::from_bytes(vec![1]));
        store.add_priv_key(peer, PrivateKey::from_bytes(vec![2]));

        assert_eq!(store.pub_key(&peer).unwrap().as_bytes(), &[1]);
        assert_eq!(store.priv_key(&peer).unwrap().as_bytes(), &[2]);
        assert_eq!(store.peers(), vec![peer]);
    }
}
