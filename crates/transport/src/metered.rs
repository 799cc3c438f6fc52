//! Byte-counting connection wrapper.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use shoal_multiaddr::Multiaddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::conn::RawConn;

/// Process-wide bandwidth counters, shared by every wrapped connection.
#[derive(Debug, Default)]
pub struct BandwidthCounters {
    inbound: AtomicU64,
    outbound: AtomicU64,
}

impl BandwidthCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn total_in(&self) -> u64 {
        self.inbound.load(Ordering::Relaxed)
    }

    pub fn total_out(&self) -> u64 {
        self.outbound.load(Ordering::Relaxed)
    }

    fn record_in(&self, n: u64) {
        self.inbound.fetch_add(n, Ordering::Relaxed);
    }

    fn record_out(&self, n: u64) {
        self.outbound.fetch_add(n, Ordering::Relaxed);
    }
}

/// Wraps a raw connection and accounts bytes moved in either direction.
#[derive(Debug)]
pub struct MeteredConn<C> {
    inner: C,
    counters: Arc<BandwidthCounters>,
}

impl<C> MeteredConn<C> {
    pub fn new(inner: C, counters: Arc<BandwidthCounters>) -> Self {
        Self { inner, counters }
    }
}

impl<C: RawConn> RawConn for MeteredConn<C> {
    fn local_addr(&self) -> &Multiaddr {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> &Multiaddr {
        self.inner.remote_addr()
    }
}

impl<C: AsyncRead + Unpin> AsyncRead for MeteredConn<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.counters.record_in((buf.filled().len() - before) as u64);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<C: AsyncWrite + Unpin> AsyncWrite for MeteredConn<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.counters.record_out(n as u64);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::StreamConn;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn counts_bytes_both_ways() {
        let counters = BandwidthCounters::new();
        let (a, b) = tokio::io::duplex(64);

        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let mut metered = MeteredConn::new(
            StreamConn::new(a, addr.clone(), addr.clone()),
            counters.clone(),
        );
        let mut peer = b;

        metered.write_all(b"hello").await.unwrap();
        metered.flush().await.unwrap();

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        peer.write_all(b"ok").await.unwrap();

        let mut buf = [0u8; 2];
        metered.read_exact(&mut buf).await.unwrap();

        assert_eq!(counters.total_out(), 5);
        assert_eq!(counters.total_in(), 2);
    }
}
