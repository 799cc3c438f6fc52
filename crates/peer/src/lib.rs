//! Peer identity and addressing primitives for the shoal network.
//!
//! - [`PeerId`] - Opaque identifier derived from a public key
//! - [`Keypair`], [`PrivateKey`], [`PublicKey`] - Key material handles
//! - [`Peerstore`] - Address book interface, with an in-memory implementation

mod id;
mod store;

pub use id::{Keypair, PeerId, PeerIdError, PrivateKey, PublicKey, PEER_ID_LEN};
pub use store::{MemoryPeerstore, Peerstore};
