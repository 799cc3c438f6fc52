//! Stream half handed to connection owners.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use shoal_multiaddr::Multiaddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use super::packet::MAX_PAYLOAD;
use crate::conn::RawConn;

/// One established uTP connection.
///
/// Reads pull in-order payloads from the connection task; writes push chunks
/// of at most one packet each. Shutting down the write half closes the
/// channel, which the connection task turns into a FIN once in-flight data is
/// acknowledged.
#[derive(Debug)]
pub struct UtpStream {
    local: Multiaddr,
    remote: Multiaddr,
    incoming: mpsc::Receiver<Bytes>,
    leftover: Bytes,
    outgoing: PollSender<Bytes>,
}

impl UtpStream {
    pub(super) fn new(
        local: Multiaddr,
        remote: Multiaddr,
        incoming: mpsc::Receiver<Bytes>,
        outgoing: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            local,
            remote,
            incoming,
            leftover: Bytes::new(),
            outgoing: PollSender::new(outgoing),
        }
    }
}

impl RawConn for UtpStream {
    fn local_addr(&self) -> &Multiaddr {
        &self.local
    }

    fn remote_addr(&self) -> &Multiaddr {
        &self.remote
    }
}

impl AsyncRead for UtpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.leftover.is_empty() {
                let n = self.leftover.len().min(buf.remaining());
                let chunk = self.leftover.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match self.incoming.poll_recv(cx) {
                Poll::Ready(Some(bytes)) => {
                    self.leftover = bytes;
                }
                // Channel closed: orderly EOF.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for UtpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.outgoing.poll_reserve(cx) {
            Poll::Ready(Ok(())) => {
                let n = buf.len().min(MAX_PAYLOAD);
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if self.outgoing.send_item(chunk).is_err() {
                    return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
                }
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Delivery and retransmission are the connection task's concern.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.outgoing.close();
        Poll::Ready(Ok(()))
    }
}
