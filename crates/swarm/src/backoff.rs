//! Backoff set: peers that recently failed a full dial.
//!
//! Presence alone is meaningful. Would-be waiters consult it and fail fast
//! instead of parking behind a dial that is likely to fail too; the
//! inaugurated dialer is unaffected, since it is the recovery path.

use std::collections::HashSet;

use parking_lot::Mutex;
use shoal_peer::PeerId;

#[derive(Debug, Default)]
pub(crate) struct DialBackoff {
    entries: Mutex<HashSet<PeerId>>,
}

impl DialBackoff {
    /// Whether callers should back off from dialing `peer`.
    pub(crate) fn backoff(&self, peer: &PeerId) -> bool {
        self.entries.lock().contains(peer)
    }

    /// Record a fully failed dial.
    pub(crate) fn add(&self, peer: PeerId) {
        self.entries.lock().insert(peer);
    }

    /// Forget the peer after a successful dial.
    pub(crate) fn clear(&self, peer: PeerId) {
        self.entries.lock().remove(&peer);
    }
}
