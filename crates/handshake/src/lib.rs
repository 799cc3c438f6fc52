//! The secure-upgrade seam: raw connections in, authenticated connections out.
//!
//! The cryptographic handshake itself lives behind [`SecureUpgrader`]; this
//! crate specifies when it runs and what it must guarantee. A [`SecureConn`]
//! never exists without a verified (or, in insecure mode, asserted) peer
//! binding.

use async_trait::async_trait;
use shoal_peer::PeerId;
use shoal_transport::BoxedConn;

mod error;
mod plaintext;
mod secure;

pub use error::UpgradeError;
pub use plaintext::PlaintextUpgrader;
pub use secure::SecureConn;

/// Upgrades raw connections into authenticated ones.
///
/// On failure the upgrader drops (closes) the underlying raw connection.
#[async_trait]
pub trait SecureUpgrader: Send + Sync {
    /// Outbound upgrade: the handshake must bind the connection to
    /// `expected`, failing with [`UpgradeError::Misdial`] otherwise.
    async fn upgrade_outbound(
        &self,
        conn: BoxedConn,
        expected: PeerId,
    ) -> Result<SecureConn, UpgradeError>;

    /// Inbound upgrade: the remote peer is learned from the handshake.
    async fn upgrade_inbound(&self, conn: BoxedConn) -> Result<SecureConn, UpgradeError>;
}
