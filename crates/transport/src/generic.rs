//! Fallback transport: a fresh socket per dial, no port reuse.

use async_trait::async_trait;
use shoal_multiaddr::Multiaddr;
use tokio::net::TcpStream;

use crate::conn::{BoxedConn, StreamConn};
use crate::error::TransportError;
use crate::registry::Transport;
use crate::is_tcp_addr;

/// Catch-all dialer registered last: accepts any address and dials the ones
/// it can express with an ephemeral socket.
#[derive(Debug, Default)]
pub struct GenericTransport;

impl GenericTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for GenericTransport {
    fn matches(&self, _addr: &Multiaddr) -> bool {
        true
    }

    async fn dial(
        &self,
        raddr: &Multiaddr,
        _laddr: Option<&Multiaddr>,
    ) -> Result<BoxedConn, TransportError> {
        if !is_tcp_addr(raddr) {
            return Err(TransportError::UnsupportedAddr(raddr.clone()));
        }
        let target = raddr
            .to_socket_addr()
            .ok_or_else(|| TransportError::UnsupportedAddr(raddr.clone()))?;

        let stream = TcpStream::connect(target).await?;
        stream.set_nodelay(true)?;
        let local = Multiaddr::from_tcp(stream.local_addr()?);
        let remote = Multiaddr::from_tcp(stream.peer_addr()?);
        Ok(Box::new(StreamConn::new(stream, local, remote)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_tcp() {
        let transport = GenericTransport::new();
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/1/utp".parse().unwrap();
        assert!(transport.matches(&addr));
        let err = transport.dial(&addr, None).await.err().expect("must fail");
        assert!(matches!(err, TransportError::UnsupportedAddr(_)));
    }
}
