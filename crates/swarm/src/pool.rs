//! The connection pool: live authenticated connections indexed by peer.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use shoal_handshake::SecureConn;
use shoal_multiaddr::Multiaddr;
use shoal_peer::PeerId;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Non-owning handle to a pooled connection. Stable for the life of the
/// process; revalidate through the pool rather than holding back-pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Live = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Live,
            1 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

/// A pool-owned authenticated connection.
///
/// I/O goes through split halves behind async mutexes so concurrent readers
/// and writers do not serialize each other. Closing is idempotent; the pool
/// learns about it through a channel the orchestrator drains.
pub struct PooledConn {
    id: ConnId,
    local_peer: PeerId,
    remote_peer: PeerId,
    local_addr: Multiaddr,
    remote_addr: Multiaddr,
    opened_at: Instant,
    state: AtomicU8,
    reader: Mutex<ReadHalf<SecureConn>>,
    writer: Mutex<WriteHalf<SecureConn>>,
    closed_tx: mpsc::UnboundedSender<ConnId>,
}

impl fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("id", &self.id)
            .field("remote_peer", &self.remote_peer)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl PooledConn {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    pub fn local_addr(&self) -> &Multiaddr {
        &self.local_addr
    }

    pub fn remote_addr(&self) -> &Multiaddr {
        &self.remote_addr
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_live(&self) -> bool {
        self.state() == ConnState::Live
    }

    /// Read some bytes. An orderly EOF from the remote closes the
    /// connection.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.lock().await.read(buf).await?;
        if n == 0 && !buf.is_empty() {
            self.close().await;
        }
        Ok(n)
    }

    pub async fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        match self.reader.lock().await.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.close().await;
                Err(err)
            }
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await?;
        writer.flush().await
    }

    /// Close the connection. Idempotent: observers are notified exactly
    /// once, via the pool.
    pub async fn close(&self) {
        if self
            .state
            .compare_exchange(
                ConnState::Live as u8,
                ConnState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let _ = self.writer.lock().await.shutdown().await;
        self.state.store(ConnState::Closed as u8, Ordering::Release);
        trace!(id = %self.id, peer = %self.remote_peer, "connection closed");
        let _ = self.closed_tx.send(self.id);
    }
}

/// Indexes pooled connections by peer; a multihomed peer may have several.
pub(crate) struct Pool {
    conns: RwLock<HashMap<PeerId, Vec<Arc<PooledConn>>>>,
    next_id: AtomicU64,
    closed_tx: mpsc::UnboundedSender<ConnId>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("conns", &self.conn_count())
            .finish()
    }
}

impl Pool {
    pub(crate) fn new(closed_tx: mpsc::UnboundedSender<ConnId>) -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed_tx,
        }
    }

    /// Install an upgraded connection and take ownership of it.
    pub(crate) fn add(&self, conn: SecureConn) -> Arc<PooledConn> {
        use shoal_transport::RawConn;

        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let local_peer = conn.local_peer();
        let remote_peer = conn.remote_peer();
        let local_addr = conn.local_addr().clone();
        let remote_addr = conn.remote_addr().clone();
        let (reader, writer) = tokio::io::split(conn);

        let pooled = Arc::new(PooledConn {
            id,
            local_peer,
            remote_peer,
            local_addr,
            remote_addr,
            opened_at: Instant::now(),
            state: AtomicU8::new(ConnState::Live as u8),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed_tx: self.closed_tx.clone(),
        });

        self.conns
            .write()
            .entry(remote_peer)
            .or_default()
            .push(pooled.clone());
        pooled
    }

    /// Any live connection to the peer. First available; selection is
    /// deliberately unranked.
    pub(crate) fn best_connection_to(&self, peer: &PeerId) -> Option<Arc<PooledConn>> {
        self.conns
            .read()
            .get(peer)?
            .iter()
            .find(|c| c.is_live())
            .cloned()
    }

    pub(crate) fn connections_to(&self, peer: &PeerId) -> Vec<Arc<PooledConn>> {
        self.conns.read().get(peer).cloned().unwrap_or_default()
    }

    /// Drop the connection from the index. Returns it once; later calls for
    /// the same id return `None`.
    pub(crate) fn remove(&self, id: ConnId) -> Option<Arc<PooledConn>> {
        let mut conns = self.conns.write();
        let peer = conns
            .iter()
            .find_map(|(peer, list)| list.iter().any(|c| c.id() == id).then_some(*peer))?;
        let list = conns.get_mut(&peer)?;
        let pos = list.iter().position(|c| c.id() == id)?;
        let conn = list.swap_remove(pos);
        if list.is_empty() {
            conns.remove(&peer);
        }
        Some(conn)
    }

    pub(crate) fn conn_count(&self) -> usize {
        self.conns.read().values().map(Vec::len).sum()
    }

    /// Empty the pool, returning everything that was in it.
    pub(crate) fn drain(&self) -> Vec<Arc<PooledConn>> {
        self.conns.write().drain().flat_map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_handshake::{PlaintextUpgrader, SecureUpgrader};
    use shoal_transport::{BoxedConn, StreamConn};

    async fn secure_pair(a: PeerId, b: PeerId) -> (SecureConn, SecureConn) {
        let a_addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let b_addr: Multiaddr = "/ip4/127.0.0.1/tcp/2".parse().unwrap();
        let (sa, sb) = tokio::io::duplex(4096);
        let ca: BoxedConn = Box::new(StreamConn::new(sa, a_addr.clone(), b_addr.clone()));
        let cb: BoxedConn = Box::new(StreamConn::new(sb, b_addr, a_addr));

        let up_a = PlaintextUpgrader::new(a);
        let up_b = PlaintextUpgrader::new(b);
        let (out, inb) = tokio::join!(up_a.upgrade_outbound(ca, b), up_b.upgrade_inbound(cb));
        (out.unwrap(), inb.unwrap())
    }

    #[tokio::test]
    async fn add_index_and_remove() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = Pool::new(tx);
        let (a, b) = (PeerId::random(), PeerId::random());
        let (conn, _other) = secure_pair(a, b).await;

        let pooled = pool.add(conn);
        assert_eq!(pool.conn_count(), 1);
        assert_eq!(pooled.remote_peer(), b);

        let found = pool.best_connection_to(&b).unwrap();
        assert_eq!(found.id(), pooled.id());

        assert!(pool.remove(pooled.id()).is_some());
        assert!(pool.remove(pooled.id()).is_none());
        assert_eq!(pool.conn_count(), 0);
        assert!(pool.best_connection_to(&b).is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_notifies_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = Pool::new(tx);
        let (a, b) = (PeerId::random(), PeerId::random());
        let (conn, _other) = secure_pair(a, b).await;

        let pooled = pool.add(conn);
        assert!(pooled.is_live());

        pooled.close().await;
        pooled.close().await;
        assert_eq!(pooled.state(), ConnState::Closed);

        assert_eq!(rx.recv().await, Some(pooled.id()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_conns_are_not_best() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = Pool::new(tx);
        let (a, b) = (PeerId::random(), PeerId::random());

        let (c1, _k1) = secure_pair(a, b).await;
        let (c2, _k2) = secure_pair(a, b).await;
        let first = pool.add(c1);
        let second = pool.add(c2);

        first.close().await;
        let best = pool.best_connection_to(&b).unwrap();
        assert_eq!(best.id(), second.id());
    }

    #[tokio::test]
    async fn bytes_flow_through_pooled_conn() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = Pool::new(tx);
        let (a, b) = (PeerId::random(), PeerId::random());
        let (conn, other) = secure_pair(a, b).await;

        let pooled = pool.add(conn);
        let remote = pool.add(other);

        pooled.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
