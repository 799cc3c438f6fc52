//! Peer-to-peer connection manager for the shoal network.
//!
//! Given a remote peer identifier, [`Swarm::dial`] establishes an
//! authenticated, transport-agnostic connection, coordinating concurrent
//! attempts across many candidate addresses and many callers:
//!
//! - concurrent `dial` calls for one peer collapse into a single attempt
//!   everyone else waits on ([`DialWaiter`]);
//! - peers that failed a full dial land in a backoff set, so would-be
//!   waiters fail fast instead of stampeding a dead peer;
//! - candidate addresses are raced in preference order under a process-wide
//!   file-descriptor budget, first authenticated connection wins.
//!
//! ```text
//!   many callers of dial()   synched w.  dials many addrs     results to callers
//!  ----------------------\   dial sync   use earliest          /--------------
//!  -----------------------\             |----------\          /----------------
//!  ------------------------>-----------<-------     >--------<-----------------
//!  -----------------------|             \----x                \----------------
//!  ----------------------|               \-----x               \---------------
//!                                        any may fail         if no addr at end
//! ```

mod addrs;
mod backoff;
mod config;
mod error;
mod events;
mod pool;
mod scheduler;
mod swarm;
mod sync;

pub use addrs::Filters;
pub use config::{
    SwarmConfig, CONCURRENT_FD_DIALS, DEFAULT_DIAL_TIMEOUT, DEFAULT_PER_PEER_DIAL_LIMIT,
};
pub use error::{DialAttemptError, DialError, SwarmError};
pub use events::{Notifiee, SwarmEvent};
pub use pool::{ConnId, ConnState, PooledConn};
pub use swarm::Swarm;
pub use sync::DialWaiter;
