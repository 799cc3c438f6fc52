//! Shared socket state: demultiplexing, handshakes, per-connection tasks.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use shoal_multiaddr::Multiaddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::packet::{Packet, PacketType, HEADER_LEN, MAX_PAYLOAD};
use super::stream::UtpStream;
use super::WINDOW_PACKETS;
use crate::error::TransportError;

const CONN_CHANNEL: usize = 64;
const ACCEPT_BACKLOG: usize = 16;
const SYN_RETRIES: usize = 4;
const SYN_TIMEOUT: Duration = Duration::from_millis(500);
const RTO: Duration = Duration::from_millis(300);
const RTO_TICK: Duration = Duration::from_millis(100);

type ConnKey = (SocketAddr, u16);
type ConnMap = Arc<Mutex<HashMap<ConnKey, mpsc::Sender<Packet>>>>;

/// One bound UDP socket serving both accept and dial.
#[derive(Debug)]
pub(super) struct UtpSocket {
    udp: Arc<UdpSocket>,
    local_sa: SocketAddr,
    conns: ConnMap,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<UtpStream>>,
    shutdown: CancellationToken,
}

impl Drop for UtpSocket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl UtpSocket {
    pub(super) async fn bind(sa: SocketAddr) -> io::Result<UtpSocket> {
        let udp = Arc::new(UdpSocket::bind(sa).await?);
        let local_sa = udp.local_addr()?;
        let conns: ConnMap = Arc::new(Mutex::new(HashMap::new()));
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let shutdown = CancellationToken::new();

        tokio::spawn(demux(
            udp.clone(),
            local_sa,
            conns.clone(),
            accept_tx,
            shutdown.clone(),
        ));
        debug!(%local_sa, "utp socket bound");

        Ok(UtpSocket {
            udp,
            local_sa,
            conns,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            shutdown,
        })
    }

    pub(super) fn local_sa(&self) -> SocketAddr {
        self.local_sa
    }

    pub(super) fn close(&self) {
        self.shutdown.cancel();
    }

    pub(super) async fn accept(&self) -> Result<UtpStream, TransportError> {
        self.accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ListenerClosed)
    }

    pub(super) async fn connect(&self, remote: SocketAddr) -> Result<UtpStream, TransportError> {
        // Register an unused receive connection id before the SYN goes out so
        // the demux task can route the reply.
        let (recv_id, mut pkt_rx) = {
            let mut conns = self.conns.lock();
            loop {
                let recv_id: u16 = rand::random();
                if conns.contains_key(&(remote, recv_id)) {
                    continue;
                }
                let (tx, rx) = mpsc::channel(CONN_CHANNEL);
                conns.insert((remote, recv_id), tx);
                break (recv_id, rx);
            }
        };
        let send_id = recv_id.wrapping_add(1);

        let syn = Packet::new(PacketType::Syn, recv_id, 0, 0).encode();
        let mut established = false;
        'retry: for _ in 0..SYN_RETRIES {
            if let Err(err) = self.udp.send_to(&syn, remote).await {
                self.conns.lock().remove(&(remote, recv_id));
                return Err(err.into());
            }
            loop {
                match timeout(SYN_TIMEOUT, pkt_rx.recv()).await {
                    Err(_) => continue 'retry,
                    Ok(None) => {
                        return Err(TransportError::ListenerClosed);
                    }
                    Ok(Some(pkt)) => match pkt.ty {
                        PacketType::State => {
                            established = true;
                            break 'retry;
                        }
                        PacketType::Reset => {
                            self.conns.lock().remove(&(remote, recv_id));
                            return Err(TransportError::Reset);
                        }
                        _ => continue,
                    },
                }
            }
        }

        if !established {
            self.conns.lock().remove(&(remote, recv_id));
            return Err(TransportError::Timeout);
        }

        trace!(%remote, recv_id, "utp connection established");
        Ok(spawn_connection(
            self.udp.clone(),
            self.conns.clone(),
            self.local_sa,
            remote,
            send_id,
            recv_id,
            pkt_rx,
            self.shutdown.child_token(),
        ))
    }
}

async fn demux(
    udp: Arc<UdpSocket>,
    local_sa: SocketAddr,
    conns: ConnMap,
    accept_tx: mpsc::Sender<UtpStream>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; HEADER_LEN + MAX_PAYLOAD + 64];
    loop {
        let (n, from) = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = udp.recv_from(&mut buf) => match res {
                Ok(v) => v,
                Err(err) => {
                    debug!(%err, "utp socket recv error");
                    continue;
                }
            },
        };

        let Some(pkt) = Packet::decode(&buf[..n]) else {
            trace!(%from, "dropping malformed utp packet");
            continue;
        };

        let tx = conns.lock().get(&(from, pkt.conn_id)).cloned();
        if let Some(tx) = tx {
            // Overload drops the packet; retransmission recovers.
            let _ = tx.try_send(pkt);
            continue;
        }

        if pkt.ty == PacketType::Syn {
            let send_id = pkt.conn_id;
            let recv_id = pkt.conn_id.wrapping_add(1);
            let state = Packet::new(PacketType::State, send_id, 0, pkt.seq).encode();

            if conns.lock().contains_key(&(from, recv_id)) {
                // Retransmitted SYN: the STATE reply was lost, re-ack.
                let _ = udp.send_to(&state, from).await;
                continue;
            }

            let (pkt_tx, pkt_rx) = mpsc::channel(CONN_CHANNEL);
            conns.lock().insert((from, recv_id), pkt_tx);
            let stream = spawn_connection(
                udp.clone(),
                conns.clone(),
                local_sa,
                from,
                send_id,
                recv_id,
                pkt_rx,
                shutdown.child_token(),
            );
            let _ = udp.send_to(&state, from).await;

            if accept_tx.try_send(stream).is_err() {
                debug!(%from, "utp accept backlog full, dropping connection");
                conns.lock().remove(&(from, recv_id));
            }
            continue;
        }

        // Unknown connection and not a SYN: best-effort reset.
        if pkt.ty != PacketType::Reset {
            let reset = Packet::new(PacketType::Reset, pkt.conn_id, 0, pkt.seq).encode();
            let _ = udp.send_to(&reset, from).await;
        }
    }
}

/// True iff `seq` is at or before `ack` in wrapping sequence space.
fn acked(seq: u16, ack: u16) -> bool {
    ack.wrapping_sub(seq) < 0x8000
}

#[allow(clippy::too_many_arguments)]
fn spawn_connection(
    udp: Arc<UdpSocket>,
    conns: ConnMap,
    local_sa: SocketAddr,
    remote: SocketAddr,
    send_id: u16,
    recv_id: u16,
    pkt_rx: mpsc::Receiver<Packet>,
    shutdown: CancellationToken,
) -> UtpStream {
    let (in_tx, in_rx) = mpsc::channel(CONN_CHANNEL);
    let (out_tx, out_rx) = mpsc::channel(CONN_CHANNEL);

    let stream = UtpStream::new(
        Multiaddr::from_utp(local_sa),
        Multiaddr::from_utp(remote),
        in_rx,
        out_tx,
    );

    let conn = Connection {
        udp,
        conns,
        remote,
        send_id,
        recv_id,
        seq_next: 1,
        their_next: 1,
        unacked: VecDeque::new(),
        in_tx: Some(in_tx),
        out_rx,
        pkt_rx,
        write_closed: false,
        fin_seq: None,
        fin_acked: false,
        last_progress: Instant::now(),
    };
    tokio::spawn(conn.run(shutdown));

    stream
}

/// Per-connection reliability state. Go-back-N with a fixed packet window.
struct Connection {
    udp: Arc<UdpSocket>,
    conns: ConnMap,
    remote: SocketAddr,
    send_id: u16,
    recv_id: u16,

    /// Next sequence number to assign to an outgoing DATA or FIN packet.
    seq_next: u16,
    /// Next in-order sequence number expected from the remote.
    their_next: u16,
    unacked: VecDeque<(u16, Bytes)>,

    /// Delivery channel to the application; `None` once EOF was signalled.
    in_tx: Option<mpsc::Sender<Bytes>>,
    out_rx: mpsc::Receiver<Bytes>,
    pkt_rx: mpsc::Receiver<Packet>,

    write_closed: bool,
    fin_seq: Option<u16>,
    fin_acked: bool,
    last_progress: Instant,
}

impl Connection {
    async fn run(mut self, shutdown: CancellationToken) {
        let mut tick = interval(RTO_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let window_open = !self.write_closed && self.unacked.len() < WINDOW_PACKETS;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                pkt = self.pkt_rx.recv() => match pkt {
                    None => break,
                    Some(pkt) => {
                        if self.handle_packet(pkt).await {
                            break;
                        }
                    }
                },
                chunk = self.out_rx.recv(), if window_open => match chunk {
                    Some(chunk) => self.send_data(chunk).await,
                    None => {
                        self.write_closed = true;
                        if self.unacked.is_empty() {
                            self.send_fin().await;
                        }
                    }
                },
                _ = tick.tick() => self.on_tick().await,
            }

            if self.fin_acked && self.in_tx.is_none() {
                break;
            }
        }

        self.conns.lock().remove(&(self.remote, self.recv_id));
        trace!(remote = %self.remote, recv_id = self.recv_id, "utp connection closed");
    }

    /// Returns true when the connection is torn down.
    async fn handle_packet(&mut self, pkt: Packet) -> bool {
        match pkt.ty {
            PacketType::State => {
                self.apply_ack(pkt.ack);
                if self.write_closed && self.unacked.is_empty() && self.fin_seq.is_none() {
                    self.send_fin().await;
                }
                false
            }
            PacketType::Data => {
                if pkt.seq == self.their_next {
                    let delivered = match &self.in_tx {
                        Some(tx) => match tx.try_send(pkt.payload) {
                            Ok(()) => true,
                            // Reader is slow: skip the ack, retransmission
                            // re-delivers once there is room.
                            Err(mpsc::error::TrySendError::Full(_)) => false,
                            // Reader gone: accept and discard.
                            Err(mpsc::error::TrySendError::Closed(_)) => true,
                        },
                        None => true,
                    };
                    if delivered {
                        self.their_next = self.their_next.wrapping_add(1);
                        self.send_state().await;
                    }
                } else {
                    // Out of order: duplicate-ack the last in-order packet.
                    self.send_state().await;
                }
                false
            }
            PacketType::Fin => {
                if pkt.seq == self.their_next {
                    self.their_next = self.their_next.wrapping_add(1);
                    self.in_tx = None;
                }
                self.send_state().await;
                false
            }
            PacketType::Reset => {
                self.in_tx = None;
                true
            }
            // Handshake duplicates are handled by the demux task.
            PacketType::Syn => false,
        }
    }

    fn apply_ack(&mut self, ack: u16) {
        let mut progressed = false;
        while let Some((seq, _)) = self.unacked.front() {
            if acked(*seq, ack) {
                self.unacked.pop_front();
                progressed = true;
            } else {
                break;
            }
        }
        if let Some(fin_seq) = self.fin_seq {
            if acked(fin_seq, ack) {
                self.fin_acked = true;
                progressed = true;
            }
        }
        if progressed {
            self.last_progress = Instant::now();
        }
    }

    fn ack_value(&self) -> u16 {
        self.their_next.wrapping_sub(1)
    }

    async fn send_data(&mut self, payload: Bytes) {
        let seq = self.seq_next;
        self.seq_next = self.seq_next.wrapping_add(1);
        let pkt = Packet::new(PacketType::Data, self.send_id, seq, self.ack_value())
            .with_payload(payload.clone());
        let _ = self.udp.send_to(&pkt.encode(), self.remote).await;
        self.unacked.push_back((seq, payload));
    }

    async fn send_state(&self) {
        let pkt = Packet::new(PacketType::State, self.send_id, 0, self.ack_value());
        let _ = self.udp.send_to(&pkt.encode(), self.remote).await;
    }

    async fn send_fin(&mut self) {
        let seq = self.seq_next;
        self.seq_next = self.seq_next.wrapping_add(1);
        self.fin_seq = Some(seq);
        let pkt = Packet::new(PacketType::Fin, self.send_id, seq, self.ack_value());
        let _ = self.udp.send_to(&pkt.encode(), self.remote).await;
        self.last_progress = Instant::now();
    }

    async fn on_tick(&mut self) {
        if self.last_progress.elapsed() < RTO {
            return;
        }
        if !self.unacked.is_empty() {
            trace!(
                remote = %self.remote,
                packets = self.unacked.len(),
                "utp retransmit window"
            );
            for (seq, payload) in &self.unacked {
                let pkt = Packet::new(PacketType::Data, self.send_id, *seq, self.ack_value())
                    .with_payload(payload.clone());
                let _ = self.udp.send_to(&pkt.encode(), self.remote).await;
            }
            self.last_progress = Instant::now();
        } else if let Some(fin_seq) = self.fin_seq {
            if !self.fin_acked {
                let pkt = Packet::new(PacketType::Fin, self.send_id, fin_seq, self.ack_value());
                let _ = self.udp.send_to(&pkt.encode(), self.remote).await;
                self.last_progress = Instant::now();
            }
        }
    }
}
