//! Plaintext identity exchange, for configurations without a private key.
//!
//! Peer identity is asserted, not verified: both sides send their peer id in
//! a single length-prefixed frame and trust what they read. Gated behind
//! `insecure_dials_allowed`; production configurations refuse to run without
//! a key.

use async_trait::async_trait;
use shoal_peer::{PeerId, PEER_ID_LEN};
use shoal_transport::BoxedConn;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{trace, warn};

use crate::{SecureConn, SecureUpgrader, UpgradeError};

const HELLO_VERSION: u8 = 1;

/// Wraps raw connections in an unverified peer binding.
#[derive(Debug, Clone)]
pub struct PlaintextUpgrader {
    local: PeerId,
}

impl PlaintextUpgrader {
    pub fn new(local: PeerId) -> Self {
        warn!(peer = %local, "connections WILL NOT be secured, peer identity is asserted only");
        Self { local }
    }

    async fn exchange(&self, conn: &mut BoxedConn) -> Result<PeerId, UpgradeError> {
        // Both ends write first; the frame fits any socket buffer, so
        // concurrent sends cannot deadlock.
        let mut hello = [0u8; 1 + PEER_ID_LEN];
        hello[0] = HELLO_VERSION;
        hello[1..].copy_from_slice(self.local.as_bytes());
        conn.write_all(&hello).await?;
        conn.flush().await?;

        let mut frame = [0u8; 1 + PEER_ID_LEN];
        conn.read_exact(&mut frame).await?;
        if frame[0] != HELLO_VERSION {
            return Err(UpgradeError::Handshake(format!(
                "unsupported hello version {}",
                frame[0]
            )));
        }
        PeerId::try_from_slice(&frame[1..])
            .map_err(|err| UpgradeError::Handshake(err.to_string()))
    }

    fn bind(&self, conn: BoxedConn, remote: PeerId) -> Result<SecureConn, UpgradeError> {
        use shoal_transport::RawConn;
        if remote == self.local {
            return Err(UpgradeError::SelfDial {
                addr: conn.remote_addr().clone(),
            });
        }
        Ok(SecureConn::new(conn, self.local, remote))
    }
}

#[async_trait]
impl SecureUpgrader for PlaintextUpgrader {
    async fn upgrade_outbound(
        &self,
        mut conn: BoxedConn,
        expected: PeerId,
    ) -> Result<SecureConn, UpgradeError> {
        let got = self.exchange(&mut conn).await?;
        if got == self.local {
            // Self-dial outranks misdial: bind() reports it.
            return self.bind(conn, got);
        }
        if got != expected {
            return Err(UpgradeError::Misdial { expected, got });
        }
        trace!(remote = %got, "insecure outbound upgrade complete");
        self.bind(conn, got)
    }

    async fn upgrade_inbound(&self, mut conn: BoxedConn) -> Result<SecureConn, UpgradeError> {
        let got = self.exchange(&mut conn).await?;
        trace!(remote = %got, "insecure inbound upgrade complete");
        self.bind(conn, got)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_multiaddr::Multiaddr;
    use shoal_transport::StreamConn;

    fn pipe() -> (BoxedConn, BoxedConn) {
        let a_addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let b_addr: Multiaddr = "/ip4/127.0.0.1/tcp/2".parse().unwrap();
        let (a, b) = tokio::io::duplex(256);
        (
            Box::new(StreamConn::new(a, a_addr.clone(), b_addr.clone())),
            Box::new(StreamConn::new(b, b_addr, a_addr)),
        )
    }

    #[tokio::test]
    async fn binds_expected_peer() {
        let alice = PeerId::random();
        let bob = PeerId::random();
        let (a_conn, b_conn) = pipe();

        let a_up = PlaintextUpgrader::new(alice);
        let b_up = PlaintextUpgrader::new(bob);

        let (out, inb) = tokio::join!(
            a_up.upgrade_outbound(a_conn, bob),
            b_up.upgrade_inbound(b_conn),
        );

        let out = out.unwrap();
        let inb = inb.unwrap();
        assert_eq!(out.remote_peer(), bob);
        assert_eq!(out.local_peer(), alice);
        assert_eq!(inb.remote_peer(), alice);
    }

    #[tokio::test]
    async fn detects_misdial() {
        let alice = PeerId::random();
        let bob = PeerId::random();
        let carol = PeerId::random();
        let (a_conn, b_conn) = pipe();

        let a_up = PlaintextUpgrader::new(alice);
        let b_up = PlaintextUpgrader::new(bob);

        let (out, _inb) = tokio::join!(
            a_up.upgrade_outbound(a_conn, carol),
            b_up.upgrade_inbound(b_conn),
        );

        match out {
            Err(UpgradeError::Misdial { expected, got }) => {
                assert_eq!(expected, carol);
                assert_eq!(got, bob);
            }
            other => panic!("expected misdial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn detects_self_dial() {
        let alice = PeerId::random();
        let (a_conn, b_conn) = pipe();

        // Both ends run the same identity, as when a loopback address we
        // advertised points back at us.
        let up = PlaintextUpgrader::new(alice);
        let up2 = up.clone();

        let (out, _inb) = tokio::join!(
            up.upgrade_outbound(a_conn, alice),
            up2.upgrade_inbound(b_conn),
        );

        assert!(matches!(out, Err(UpgradeError::SelfDial { .. })));
    }
}
