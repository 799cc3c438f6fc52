//! uTP transport: one UDP socket serves both accept and dial.
//!
//! Connections do not consume file descriptors beyond the shared socket,
//! which is why the address scheduler treats them as free parallelism. The
//! wire layer is BEP-29 framing with a fixed go-back-N window; delay-based
//! congestion control is intentionally absent (the transport contract
//! delegates congestion behavior).

use std::sync::Arc;

use async_trait::async_trait;
use shoal_multiaddr::Multiaddr;

use crate::conn::BoxedConn;
use crate::error::TransportError;
use crate::is_utp_addr;
use crate::registry::{Listener, Transport};

mod packet;
mod socket;
mod stream;

pub use stream::UtpStream;

use socket::UtpSocket;

pub(crate) const WINDOW_PACKETS: usize = 16;
pub(crate) const RECV_WINDOW_BYTES: u32 = (WINDOW_PACKETS * packet::MAX_PAYLOAD) as u32;

/// A single uTP socket bound to one listen address, serving accepts and
/// outbound dials alike.
#[derive(Debug)]
pub struct UtpTransport {
    socket: UtpSocket,
    local_addr: Multiaddr,
}

impl UtpTransport {
    pub async fn bind(addr: &Multiaddr) -> Result<Arc<Self>, TransportError> {
        let sa = addr
            .to_socket_addr()
            .filter(|_| is_utp_addr(addr))
            .ok_or_else(|| TransportError::UnsupportedAddr(addr.clone()))?;

        let socket = UtpSocket::bind(sa).await?;
        let local_addr = Multiaddr::from_utp(socket.local_sa());
        Ok(Arc::new(Self { socket, local_addr }))
    }

    /// Stop the socket: in-flight connections are torn down.
    pub fn close(&self) {
        self.socket.close();
    }
}

#[async_trait]
impl Transport for UtpTransport {
    fn matches(&self, addr: &Multiaddr) -> bool {
        is_utp_addr(addr)
    }

    async fn dial(
        &self,
        raddr: &Multiaddr,
        _laddr: Option<&Multiaddr>,
    ) -> Result<BoxedConn, TransportError> {
        // The shared socket is the local binding; hints do not apply.
        let sa = raddr
            .to_socket_addr()
            .ok_or_else(|| TransportError::UnsupportedAddr(raddr.clone()))?;
        Ok(Box::new(self.socket.connect(sa).await?))
    }
}

#[async_trait]
impl Listener for UtpTransport {
    async fn accept(&self) -> Result<BoxedConn, TransportError> {
        Ok(Box::new(self.socket.accept().await?))
    }

    fn local_addr(&self) -> &Multiaddr {
        &self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn ephemeral() -> Multiaddr {
        "/ip4/127.0.0.1/udp/0/utp".parse().unwrap()
    }

    #[tokio::test]
    async fn dial_and_echo() {
        let a = UtpTransport::bind(&ephemeral()).await.unwrap();
        let b = UtpTransport::bind(&ephemeral()).await.unwrap();

        let b_addr = b.local_addr().clone();
        let echo = tokio::spawn(async move {
            let mut conn = b.accept().await.unwrap();
            let mut buf = vec![0u8; 11];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(&buf).await.unwrap();
            // Keep the accept side alive until the peer has read the echo.
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        });

        let mut conn = a.dial(&b_addr, None).await.unwrap();
        conn.write_all(b"hello shoal").await.unwrap();

        let mut buf = vec![0u8; 11];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello shoal");

        echo.await.unwrap();
    }

    #[tokio::test]
    async fn transfer_larger_than_one_packet() {
        let a = UtpTransport::bind(&ephemeral()).await.unwrap();
        let b = UtpTransport::bind(&ephemeral()).await.unwrap();

        let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let b_addr = b.local_addr().clone();
        let sink = tokio::spawn(async move {
            let mut conn = b.accept().await.unwrap();
            let mut received = Vec::new();
            conn.read_to_end(&mut received).await.unwrap();
            received
        });

        let mut conn = a.dial(&b_addr, None).await.unwrap();
        conn.write_all(&payload).await.unwrap();
        conn.shutdown().await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(30), sink)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn dial_to_dead_port_times_out() {
        let a = UtpTransport::bind(&ephemeral()).await.unwrap();
        // Nothing listens on this UDP port.
        let dead = UtpTransport::bind(&ephemeral()).await.unwrap();
        let dead_addr = dead.local_addr().clone();
        dead.close();
        drop(dead);

        let err = a.dial(&dead_addr, None).await.err().expect("must fail");
        assert!(matches!(err, TransportError::Timeout | TransportError::Reset));
    }
}
