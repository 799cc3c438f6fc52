//! Per-address dial scheduler: race sorted candidates under FD budgets.

use std::sync::Arc;

use shoal_handshake::{SecureConn, SecureUpgrader};
use shoal_multiaddr::Multiaddr;
use shoal_peer::PeerId;
use shoal_transport::Dialer;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::addrs::{is_fd_costly, sort_addrs, Filters};
use crate::config::CONCURRENT_FD_DIALS;
use crate::error::{DialAttemptError, DialError};

/// Budget for FD-costly sub-dials, shared across every peer and every swarm
/// in the process.
static FD_DIALS: Semaphore = Semaphore::const_new(CONCURRENT_FD_DIALS);

/// Races a peer's candidate addresses and returns the first authenticated
/// connection, cancelling the losers.
pub(crate) struct AddrScheduler {
    dialer: Arc<Dialer>,
    upgrader: Arc<dyn SecureUpgrader>,
    filters: Arc<Filters>,
    per_peer_limit: usize,
}

impl std::fmt::Debug for AddrScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddrScheduler")
            .field("per_peer_limit", &self.per_peer_limit)
            .finish()
    }
}

impl AddrScheduler {
    pub(crate) fn new(
        dialer: Arc<Dialer>,
        upgrader: Arc<dyn SecureUpgrader>,
        filters: Arc<Filters>,
        per_peer_limit: usize,
    ) -> Self {
        Self {
            dialer,
            upgrader,
            filters,
            per_peer_limit,
        }
    }

    /// Dial the candidate set concurrently, bounded by the per-peer limit
    /// and, for FD-costly transports, the global FD budget.
    pub(crate) async fn dial_addrs(
        &self,
        cancel: &CancellationToken,
        peer: PeerId,
        addrs: Vec<Multiaddr>,
    ) -> Result<SecureConn, DialError> {
        // Preprocess: drop blocked addresses and anything that would dial
        // one of our own listeners, then order by preference.
        let own = self.dialer.local_addrs();
        let mut addrs: Vec<Multiaddr> = addrs
            .into_iter()
            .filter(|a| !self.filters.blocked(a))
            .filter(|a| !own.contains(a))
            .collect();
        if addrs.is_empty() {
            return Err(DialError::NoAddresses);
        }
        sort_addrs(&mut addrs);

        let total = addrs.len();
        debug!(%peer, total, "racing candidate addresses");

        let attempt_cancel = cancel.child_token();
        // If this future is dropped mid-race, abort the in-flight attempts.
        let _abort_guard = attempt_cancel.clone().drop_guard();

        let (tx, mut rx) = mpsc::channel::<Result<SecureConn, DialAttemptError>>(total);
        let local_limit = Arc::new(Semaphore::new(self.per_peer_limit));

        // Issue attempts in sorted order as permits free up. Stops early on
        // cancellation or once a winner cancels the race.
        let spawner = {
            let attempt_cancel = attempt_cancel.clone();
            let dialer = self.dialer.clone();
            let upgrader = self.upgrader.clone();
            let tx = tx.clone();
            async move {
                for addr in addrs {
                    let local_permit = tokio::select! {
                        _ = attempt_cancel.cancelled() => break,
                        permit = local_limit.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let fd_permit = if is_fd_costly(&addr) {
                        tokio::select! {
                            _ = attempt_cancel.cancelled() => break,
                            permit = FD_DIALS.acquire() => match permit {
                                Ok(permit) => Some(permit),
                                Err(_) => break,
                            },
                        }
                    } else {
                        None
                    };

                    tokio::spawn(dial_one(
                        dialer.clone(),
                        upgrader.clone(),
                        attempt_cancel.clone(),
                        peer,
                        addr,
                        tx.clone(),
                        local_permit,
                        fd_permit,
                    ));
                }
            }
        };
        tokio::spawn(spawner);
        drop(tx);

        let mut last_err: Option<DialAttemptError> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    attempt_cancel.cancel();
                    return Err(DialError::Cancelled);
                }
                result = rx.recv() => match result {
                    Some(Ok(conn)) => {
                        // Winner: abort the rest of the race.
                        attempt_cancel.cancel();
                        return Ok(conn);
                    }
                    Some(Err(err)) => {
                        debug!(%peer, %err, "address dial attempt failed");
                        last_err = Some(err);
                    }
                    None => break,
                },
            }
        }

        match last_err {
            Some(last) => Err(DialError::Failed { peer, last }),
            // No attempt resolved: the race was torn down by cancellation.
            None => Err(DialError::Cancelled),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dial_one(
    dialer: Arc<Dialer>,
    upgrader: Arc<dyn SecureUpgrader>,
    cancel: CancellationToken,
    peer: PeerId,
    addr: Multiaddr,
    tx: mpsc::Sender<Result<SecureConn, DialAttemptError>>,
    _local_permit: tokio::sync::OwnedSemaphorePermit,
    _fd_permit: Option<tokio::sync::SemaphorePermit<'static>>,
) {
    let attempt = async {
        let raw = dialer.dial(&addr).await?;
        let conn = upgrader.upgrade_outbound(raw, peer).await?;
        Ok::<_, DialAttemptError>(conn)
    };

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            trace!(%addr, "dial attempt cancelled");
            return;
        }
        result = attempt => result,
    };

    match result {
        Ok(conn) => {
            if cancel.is_cancelled() {
                // Late success after a winner was chosen: close it.
                trace!(%addr, "closing late-arriving connection");
                drop(conn);
                return;
            }
            // A full channel or dropped receiver also means a winner was
            // taken; the connection is dropped (closed) either way.
            let _ = tx.try_send(Ok(conn));
        }
        Err(err) => {
            let _ = tx.send(Err(err)).await;
        }
    }
}
