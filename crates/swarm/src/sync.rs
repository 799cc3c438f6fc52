//! Dial synchronization: one in-flight dial per peer, everyone else waits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use shoal_peer::PeerId;
use tokio::sync::Notify;

/// One-shot broadcast latch. Closed exactly once by the inaugurated dialer;
/// waking is by close, never by counting.
#[derive(Debug, Default)]
pub struct DialWaiter {
    done: AtomicBool,
    notify: Notify,
}

impl DialWaiter {
    fn close(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Wait until the latch is closed. Returns immediately if it already is.
    pub async fn wait(&self) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before the second check so a close racing with
        // this call cannot be missed.
        let _ = notified.as_mut().enable();
        if self.done.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Collapses simultaneous dial requests for one peer into a single attempt.
///
/// The inaugurated caller dials; everyone else parks on the peer's
/// [`DialWaiter`] and re-checks the pool when released.
#[derive(Debug, Default)]
pub(crate) struct DialSync {
    ongoing: Mutex<HashMap<PeerId, Arc<DialWaiter>>>,
}

impl DialSync {
    /// Returns `(true, waiter)` when the caller is now charged with dialing
    /// the peer, `(false, waiter)` when a dial is already in flight.
    pub(crate) fn acquire(&self, peer: PeerId) -> (bool, Arc<DialWaiter>) {
        let mut ongoing = self.ongoing.lock();
        match ongoing.get(&peer) {
            Some(waiter) => (false, waiter.clone()),
            None => {
                let waiter = Arc::new(DialWaiter::default());
                ongoing.insert(peer, waiter.clone());
                (true, waiter)
            }
        }
    }

    /// End the in-flight dial for `peer`, waking every waiter at once.
    ///
    /// Calling this without a matching `acquire` is a programmer error.
    pub(crate) fn release(&self, peer: PeerId) {
        let waiter = self
            .ongoing
            .lock()
            .remove(&peer)
            .unwrap_or_else(|| panic!("release without ongoing dial to {peer}"));
        waiter.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn one_inaugurated_caller_per_peer() {
        let sync = DialSync::default();
        let peer = PeerId::random();

        let (first, w1) = sync.acquire(peer);
        let (second, w2) = sync.acquire(peer);

        assert!(first);
        assert!(!second);
        assert!(Arc::ptr_eq(&w1, &w2));

        // A different peer gets its own slot.
        let (other, _) = sync.acquire(PeerId::random());
        assert!(other);
    }

    #[test]
    fn release_opens_a_fresh_slot() {
        let sync = DialSync::default();
        let peer = PeerId::random();

        let (_, w1) = sync.acquire(peer);
        sync.release(peer);
        assert!(w1.is_closed());

        let (inaugurated, w2) = sync.acquire(peer);
        assert!(inaugurated);
        assert!(!Arc::ptr_eq(&w1, &w2));
    }

    #[test]
    #[should_panic(expected = "release without ongoing dial")]
    fn release_without_acquire_panics() {
        let sync = DialSync::default();
        sync.release(PeerId::random());
    }

    #[tokio::test]
    async fn close_wakes_all_waiters() {
        let sync = Arc::new(DialSync::default());
        let peer = PeerId::random();
        let (inaugurated, _) = sync.acquire(peer);
        assert!(inaugurated);

        let woken = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (inaugurated, waiter) = sync.acquire(peer);
            assert!(!inaugurated);
            let woken = woken.clone();
            tasks.push(tokio::spawn(async move {
                waiter.wait().await;
                woken.fetch_add(1, Ordering::SeqCst);
            }));
        }

        sync.release(peer);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn wait_after_close_returns_immediately() {
        let waiter = DialWaiter::default();
        waiter.close();
        waiter.wait().await;
    }

    #[tokio::test]
    async fn never_two_inaugurated_at_once() {
        let sync = Arc::new(DialSync::default());
        let peer = PeerId::random();
        let active = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let sync = sync.clone();
            let active = active.clone();
            tasks.push(tokio::spawn(async move {
                let (first, waiter) = sync.acquire(peer);
                if first {
                    assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    sync.release(peer);
                } else {
                    waiter.wait().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
