//! Raw bidirectional byte channels with multiaddr endpoints.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use shoal_multiaddr::Multiaddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A raw, unauthenticated byte channel. Owned by whoever dialed or accepted
/// it until it is handed to the connection pool.
pub trait RawConn: AsyncRead + AsyncWrite + Send + Unpin {
    fn local_addr(&self) -> &Multiaddr;
    fn remote_addr(&self) -> &Multiaddr;
}

pub type BoxedConn = Box<dyn RawConn>;

impl RawConn for BoxedConn {
    fn local_addr(&self) -> &Multiaddr {
        (**self).local_addr()
    }

    fn remote_addr(&self) -> &Multiaddr {
        (**self).remote_addr()
    }
}

/// Adapter attaching multiaddr endpoints to any byte stream.
#[derive(Debug)]
pub struct StreamConn<S> {
    stream: S,
    local: Multiaddr,
    remote: Multiaddr,
}

impl<S> StreamConn<S> {
    pub fn new(stream: S, local: Multiaddr, remote: Multiaddr) -> Self {
        Self {
            stream,
            local,
            remote,
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin> RawConn for StreamConn<S> {
    fn local_addr(&self) -> &Multiaddr {
        &self.local
    }

    fn remote_addr(&self) -> &Multiaddr {
        &self.remote
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for StreamConn<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for StreamConn<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
