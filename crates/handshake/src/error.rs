use shoal_multiaddr::Multiaddr;
use shoal_peer::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// The handshake bound the connection to a different peer than dialed.
    #[error("misdial: expected {expected}, got {got}")]
    Misdial { expected: PeerId, got: PeerId },
    /// The verified remote peer is ourselves. Happens when loopback
    /// addresses are advertised.
    #[error("connected to self through {addr}")]
    SelfDial { addr: Multiaddr },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
