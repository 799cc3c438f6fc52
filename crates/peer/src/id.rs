//! Peer identifiers and key material handles.
//!
//! A [`PeerId`] is an opaque 32-byte identifier derived from a peer's public
//! key. Equality and ordering are byte-wise; the wire rendering is base58.
//! Key material itself is opaque to this crate: the cryptographic handshake
//! lives behind the secure-upgrader seam and only needs stable handles.

use std::fmt;
use std::str::FromStr;

use sha3::{Digest, Sha3_256};

/// Length of a peer identifier in bytes.
pub const PEER_ID_LEN: usize = 32;

/// Opaque peer identifier, derived from a public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Derive the identifier for a public key.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let digest = Sha3_256::digest(key.as_bytes());
        let mut bytes = [0u8; PEER_ID_LEN];
        bytes.copy_from_slice(&digest);
        PeerId(bytes)
    }

    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        PeerId(bytes)
    }

    /// Parse from a byte slice, failing on length mismatch.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, PeerIdError> {
        let bytes: [u8; PEER_ID_LEN] = slice
            .try_into()
            .map_err(|_| PeerIdError::InvalidLength(slice.len()))?;
        Ok(PeerId(bytes))
    }

    /// A random identifier, for tests and ephemeral nodes.
    pub fn random() -> Self {
        PeerId(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncated form keeps log lines readable.
        let full = bs58::encode(&self.0).into_string();
        write!(f, "PeerId({}…)", &full[..8.min(full.len())])
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| PeerIdError::InvalidBase58)?;
        Self::try_from_slice(&bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerIdError {
    #[error("peer id is not valid base58")]
    InvalidBase58,
    #[error("peer id must be {PEER_ID_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// Opaque public key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The identifier this key corresponds to.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({} bytes)", self.0.len())
    }
}

/// Opaque private key bytes. Never rendered in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        PrivateKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A private/public key pair with its derived identifier.
#[derive(Debug, Clone)]
pub struct Keypair {
    private: PrivateKey,
    public: PublicKey,
}

impl Keypair {
    /// Generate an ephemeral keypair.
    pub fn generate() -> Self {
        let private: [u8; 32] = rand::random();
        let public: [u8; 32] = rand::random();
        Keypair {
            private: PrivateKey::from_bytes(private.to_vec()),
            public: PublicKey::from_bytes(public.to_vec()),
        }
    }

    pub fn from_parts(private: PrivateKey, public: PublicKey) -> Self {
        Keypair { private, public }
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn peer_id(&self) -> PeerId {
        self.public.peer_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_base58_round_trip() {
        let id = PeerId::random();
        let s = id.to_string();
        let parsed: PeerId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn peer_id_rejects_bad_input() {
        assert_eq!(
            "0OIl".parse::<PeerId>(),
            Err(PeerIdError::InvalidBase58)
        );
        assert!(matches!(
            bs58::encode([1u8; 4]).into_string().parse::<PeerId>(),
            Err(PeerIdError::InvalidLength(4))
        ));
    }

    #[test]
    fn derived_from_public_key_is_stable() {
        let key = PublicKey::from_bytes(vec![1, 2, 3]);
        assert_eq!(key.peer_id(), key.peer_id());

        let other = PublicKey::from_bytes(vec![1, 2, 4]);
        assert_ne!(key.peer_id(), other.peer_id());
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = PeerId::from_bytes([0u8; 32]);
        let b = PeerId::from_bytes([1u8; 32]);
        assert!(a < b);
    }

    #[test]
    fn private_key_debug_is_redacted() {
        let keypair = Keypair::generate();
        assert_eq!(format!("{:?}", keypair.private()), "PrivateKey(..)");
    }
}
