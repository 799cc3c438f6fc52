//! TCP transport with listener port reuse.
//!
//! The listen socket is bound with `SO_REUSEADDR` and (on unix)
//! `SO_REUSEPORT`; outbound dials bind to the same local port so the remote
//! observes our listen address as the connection source. When the reuse bind
//! cannot be satisfied the dial falls back to an ephemeral port.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use shoal_multiaddr::Multiaddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, trace};

use crate::conn::{BoxedConn, StreamConn};
use crate::error::TransportError;
use crate::registry::{Listener, Transport};
use crate::is_tcp_addr;

const LISTEN_BACKLOG: u32 = 1024;

/// Listens on one TCP multiaddr and dials out reusing its port.
#[derive(Debug)]
pub struct TcpReuseTransport {
    listener: TcpListener,
    local_addr: Multiaddr,
}

impl TcpReuseTransport {
    /// Bind the listen address. The returned transport serves both accepts
    /// and reuse-dials.
    pub async fn bind(addr: &Multiaddr) -> Result<Arc<Self>, TransportError> {
        let sa = addr
            .to_socket_addr()
            .filter(|_| is_tcp_addr(addr))
            .ok_or_else(|| TransportError::UnsupportedAddr(addr.clone()))?;

        let socket = reuse_socket(&sa)?;
        socket.bind(sa)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = Multiaddr::from_tcp(listener.local_addr()?);
        debug!(%local_addr, "tcp listener bound");

        Ok(Arc::new(Self {
            listener,
            local_addr,
        }))
    }

    async fn dial_reuse(&self, target: SocketAddr, bind: SocketAddr) -> io::Result<TcpStream> {
        let socket = reuse_socket(&target)?;
        socket.bind(bind)?;
        socket.connect(target).await
    }
}

#[async_trait]
impl Transport for TcpReuseTransport {
    fn matches(&self, addr: &Multiaddr) -> bool {
        is_tcp_addr(addr)
    }

    async fn dial(
        &self,
        raddr: &Multiaddr,
        laddr: Option<&Multiaddr>,
    ) -> Result<BoxedConn, TransportError> {
        let target = raddr
            .to_socket_addr()
            .ok_or_else(|| TransportError::UnsupportedAddr(raddr.clone()))?;
        let listen_sa = self.listener.local_addr()?;

        // Bind to the hinted interface but keep our listen port.
        let bind = match laddr.and_then(|a| a.ip()) {
            Some(ip) if ip.is_ipv4() == target.is_ipv4() => {
                SocketAddr::new(ip, listen_sa.port())
            }
            _ => listen_sa,
        };

        let stream = match self.dial_reuse(target, bind).await {
            Ok(stream) => stream,
            Err(err) if reuse_err_should_retry(&err) => {
                trace!(%raddr, %err, "reuse dial failed, retrying without port reuse");
                TcpStream::connect(target).await?
            }
            Err(err) => return Err(err.into()),
        };

        Ok(wrap_stream(stream)?)
    }
}

#[async_trait]
impl Listener for TcpReuseTransport {
    async fn accept(&self) -> Result<BoxedConn, TransportError> {
        let (stream, _) = self.listener.accept().await?;
        Ok(wrap_stream(stream)?)
    }

    fn local_addr(&self) -> &Multiaddr {
        &self.local_addr
    }
}

fn wrap_stream(stream: TcpStream) -> io::Result<BoxedConn> {
    stream.set_nodelay(true)?;
    let local = Multiaddr::from_tcp(stream.local_addr()?);
    let remote = Multiaddr::from_tcp(stream.peer_addr()?);
    Ok(Box::new(StreamConn::new(stream, local, remote)))
}

fn reuse_socket(sa: &SocketAddr) -> io::Result<TcpSocket> {
    let socket = if sa.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    Ok(socket)
}

/// Diagnose whether a reuse-dial error is a bind failure worth retrying on an
/// ephemeral port. Real dial failures (refused, timeout) are final.
fn reuse_err_should_retry(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::TimedOut => false,
        io::ErrorKind::ConnectionRefused => false,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => true,
        // Unknown errno: optimistically retry.
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn ephemeral() -> Multiaddr {
        "/ip4/127.0.0.1/tcp/0".parse().unwrap()
    }

    #[tokio::test]
    async fn dial_reuses_listen_port() {
        let a = TcpReuseTransport::bind(&ephemeral()).await.unwrap();
        let b = TcpReuseTransport::bind(&ephemeral()).await.unwrap();

        let b_addr = b.local_addr().clone();
        let accept = tokio::spawn(async move { b.accept().await });

        let conn = a.dial(&b_addr, None).await.unwrap();
        let accepted = accept.await.unwrap().unwrap();

        // The accepted side sees our listen address as the source.
        assert_eq!(accepted.remote_addr(), a.local_addr());
        assert_eq!(conn.local_addr(), a.local_addr());
    }

    #[tokio::test]
    async fn bytes_round_trip() {
        let a = TcpReuseTransport::bind(&ephemeral()).await.unwrap();
        let b = TcpReuseTransport::bind(&ephemeral()).await.unwrap();

        let b_addr = b.local_addr().clone();
        let accept = tokio::spawn(async move {
            let mut conn = b.accept().await.unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(&buf).await.unwrap();
        });

        let mut conn = a.dial(&b_addr, None).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        accept.await.unwrap();
    }

    #[tokio::test]
    async fn refused_is_not_retried_forever() {
        let a = TcpReuseTransport::bind(&ephemeral()).await.unwrap();

        // Bind then drop to obtain a port that refuses connections.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = Multiaddr::from_tcp(dead.local_addr().unwrap());
        drop(dead);

        let err = a.dial(&dead_addr, None).await.err().expect("must fail");
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn retry_classification() {
        assert!(reuse_err_should_retry(&io::Error::from(
            io::ErrorKind::AddrInUse
        )));
        assert!(reuse_err_should_retry(&io::Error::from(
            io::ErrorKind::AddrNotAvailable
        )));
        assert!(!reuse_err_should_retry(&io::Error::from(
            io::ErrorKind::ConnectionRefused
        )));
        assert!(!reuse_err_should_retry(&io::Error::from(
            io::ErrorKind::TimedOut
        )));
        assert!(reuse_err_should_retry(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
