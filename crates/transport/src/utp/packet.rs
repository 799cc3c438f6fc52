//! BEP-29 packet framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub(super) const HEADER_LEN: usize = 20;
pub(super) const VERSION: u8 = 1;

/// Largest payload carried by one DATA packet.
pub(super) const MAX_PAYLOAD: usize = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PacketType {
    Data = 0,
    Fin = 1,
    State = 2,
    Reset = 3,
    Syn = 4,
}

impl PacketType {
    fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0 => Some(PacketType::Data),
            1 => Some(PacketType::Fin),
            2 => Some(PacketType::State),
            3 => Some(PacketType::Reset),
            4 => Some(PacketType::Syn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct Packet {
    pub ty: PacketType,
    pub conn_id: u16,
    pub wnd_size: u32,
    pub seq: u16,
    pub ack: u16,
    pub payload: Bytes,
}

impl Packet {
    pub(super) fn new(ty: PacketType, conn_id: u16, seq: u16, ack: u16) -> Self {
        Packet {
            ty,
            conn_id,
            wnd_size: super::RECV_WINDOW_BYTES,
            seq,
            ack,
            payload: Bytes::new(),
        }
    }

    pub(super) fn with_payload(mut self, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        self.payload = payload;
        self
    }

    pub(super) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(((self.ty as u8) << 4) | VERSION);
        buf.put_u8(0); // no extensions
        buf.put_u16(self.conn_id);
        // Timestamp fields exist for delay-based congestion control, which is
        // delegated per the transport contract; they are carried as zero.
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(self.wnd_size);
        buf.put_u16(self.seq);
        buf.put_u16(self.ack);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub(super) fn decode(mut buf: &[u8]) -> Option<Packet> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let type_ver = buf.get_u8();
        if type_ver & 0x0f != VERSION {
            return None;
        }
        let ty = PacketType::from_nibble(type_ver >> 4)?;
        let _extension = buf.get_u8();
        let conn_id = buf.get_u16();
        let _timestamp = buf.get_u32();
        let _timestamp_diff = buf.get_u32();
        let wnd_size = buf.get_u32();
        let seq = buf.get_u16();
        let ack = buf.get_u16();
        let payload = Bytes::copy_from_slice(buf);

        Some(Packet {
            ty,
            conn_id,
            wnd_size,
            seq,
            ack,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let pkt = Packet::new(PacketType::Data, 42, 7, 3)
            .with_payload(Bytes::from_static(b"payload"));
        let decoded = Packet::decode(&pkt.encode()).unwrap();

        assert_eq!(decoded.ty, PacketType::Data);
        assert_eq!(decoded.conn_id, 42);
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.ack, 3);
        assert_eq!(&decoded.payload[..], b"payload");
    }

    #[test]
    fn rejects_short_and_bad_version() {
        assert!(Packet::decode(&[0u8; 10]).is_none());

        let mut encoded = Packet::new(PacketType::Syn, 1, 0, 0).encode().to_vec();
        encoded[0] = (4 << 4) | 2; // version 2
        assert!(Packet::decode(&encoded).is_none());
    }
}
