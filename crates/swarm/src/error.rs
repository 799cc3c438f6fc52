use shoal_handshake::UpgradeError;
use shoal_multiaddr::Multiaddr;
use shoal_peer::PeerId;
use shoal_transport::TransportError;

/// Why one per-address attempt failed. The scheduler aggregates these and
/// surfaces only the last one.
#[derive(Debug, thiserror::Error)]
pub enum DialAttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
    #[error("dial timed out")]
    Timeout,
    #[error("no connection established")]
    NotEstablished,
}

/// Failure taxonomy for `dial`. Every failure maps to exactly one variant.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// The target is the local peer; never retried.
    #[error("dial to self attempted")]
    SelfDial,
    /// The peerstore had no usable addresses after filtering.
    #[error("peer has no addresses")]
    NoAddresses,
    /// Non-inaugurated caller found the peer in the backoff set.
    #[error("dial backoff")]
    Backoff,
    /// All per-address attempts failed; carries the last underlying error.
    #[error("dial attempt failed for {peer}: {last}")]
    Failed {
        peer: PeerId,
        last: DialAttemptError,
    },
    /// The caller's cancellation fired. Not a peer fault.
    #[error("dial cancelled")]
    Cancelled,
    #[error("swarm closed")]
    Closed,
}

/// Errors constructing the swarm or standing up listeners.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("refusing to construct swarm without a private key (insecure_dials_allowed gates the test-only path)")]
    PrivateKeyRequired,
    #[error("cannot listen on {0}: no transport for address")]
    UnsupportedListenAddr(Multiaddr),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
