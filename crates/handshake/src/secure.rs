//! Authenticated connections.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use shoal_multiaddr::Multiaddr;
use shoal_peer::PeerId;
use shoal_transport::{BoxedConn, RawConn};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A raw connection bound to a verified remote peer identity.
///
/// Only upgraders construct these; a `SecureConn` never exists without a
/// peer binding.
pub struct SecureConn {
    inner: BoxedConn,
    local_peer: PeerId,
    remote_peer: PeerId,
}

impl SecureConn {
    /// Bind a raw connection to a verified peer. Upgrader implementations
    /// call this after their handshake completes.
    pub fn new(inner: BoxedConn, local_peer: PeerId, remote_peer: PeerId) -> Self {
        Self {
            inner,
            local_peer,
            remote_peer,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }
}

impl fmt::Debug for SecureConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConn")
            .field("local_peer", &self.local_peer)
            .field("remote_peer", &self.remote_peer)
            .field("remote_addr", self.inner.remote_addr())
            .finish()
    }
}

impl RawConn for SecureConn {
    fn local_addr(&self) -> &Multiaddr {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> &Multiaddr {
        self.inner.remote_addr()
    }
}

impl AsyncRead for SecureConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
