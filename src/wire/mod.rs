//! Wire codec: serializes/deserializes the packet kinds described in the
//! transport's external interface. Every packet starts with a 4-byte
//! big-endian type tag (`PacketType`), followed by a kind-specific body.
//!
//! All integers are network byte order. This mirrors
//! `NetworkPacketHeader`/`VideoPacketHeader` (`ns3::Buffer::Iterator::
//! WriteHtonU*`), expressed here as plain `to_be_bytes`/`from_be_bytes` on
//! owned `Vec<u8>` buffers, the same style `hgaiser-moonshine`'s video
//! packetizer uses for its own headers.

mod header;

pub use header::{
    AckHeader, DataHeader, FecDigest, FecHeader, FrameAckHeader, LossRun, NetStateHeader,
    ReceiveSample, VideoHeader,
};

use thiserror::Error;

/// Errors raised while decoding a packet off the wire. Always a recoverable
/// condition at the receiver: the packet is logged and dropped, never
/// propagated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packet buffer too short: need at least {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unrecognized packet type tag {0:#x}")]
    UnknownType(u32),
}

fn need(buf: &[u8], offset: usize, len: usize) -> Result<(), WireError> {
    if buf.len() < offset + len {
        Err(WireError::Truncated { need: offset + len, have: buf.len() })
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    Data = 1,
    Fec = 2,
    DupFec = 3,
    Ack = 4,
    FrameAck = 5,
    NetState = 6,
}

impl PacketType {
    fn from_u32(v: u32) -> Result<Self, WireError> {
        Ok(match v {
            1 => PacketType::Data,
            2 => PacketType::Fec,
            3 => PacketType::DupFec,
            4 => PacketType::Ack,
            5 => PacketType::FrameAck,
            6 => PacketType::NetState,
            other => return Err(WireError::UnknownType(other)),
        })
    }
}

/// A single on-wire message. `Fec`/`DupFec` carry no payload bytes: FEC
/// recovery math is out of scope (the receiver treats a group as
/// recoverable once it has seen `group_data_num` distinct packets,
/// regardless of kind), so all a FEC packet needs on the wire is the list
/// of data-packet positions it stands in for.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Data { video: VideoHeader, data: DataHeader, payload: Vec<u8> },
    Fec { video: VideoHeader, fec: FecHeader },
    /// Same body shape as `Fec`; the distinct tag marks this FEC packet as
    /// belonging to a retransmission batch rather than the frame's
    /// original batch.
    DupFec { video: VideoHeader, fec: FecHeader },
    Ack(AckHeader),
    FrameAck(FrameAckHeader),
    NetState(NetStateHeader),
}

impl Packet {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let tag = match self {
            Packet::Data { .. } => PacketType::Data,
            Packet::Fec { .. } => PacketType::Fec,
            Packet::DupFec { .. } => PacketType::DupFec,
            Packet::Ack(_) => PacketType::Ack,
            Packet::FrameAck(_) => PacketType::FrameAck,
            Packet::NetState(_) => PacketType::NetState,
        };
        buf.extend((tag as u32).to_be_bytes());
        match self {
            Packet::Data { video, data, payload } => {
                video.serialize(&mut buf);
                data.serialize(&mut buf);
                buf.extend(payload);
            }
            Packet::Fec { video, fec } | Packet::DupFec { video, fec } => {
                video.serialize(&mut buf);
                fec.serialize(&mut buf);
            }
            Packet::Ack(ack) => ack.serialize(&mut buf),
            Packet::FrameAck(fa) => fa.serialize(&mut buf),
            Packet::NetState(ns) => ns.serialize(&mut buf),
        }
        buf
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        need(buf, 0, 4)?;
        let tag = PacketType::from_u32(u32::from_be_bytes(buf[0..4].try_into().unwrap()))?;
        let body = &buf[4..];
        Ok(match tag {
            PacketType::Data => {
                let (video, off) = VideoHeader::deserialize(body)?;
                let (data, off2) = DataHeader::deserialize(&body[off..])?;
                let payload = body[off + off2..].to_vec();
                Packet::Data { video, data, payload }
            }
            PacketType::Fec | PacketType::DupFec => {
                let (video, off) = VideoHeader::deserialize(body)?;
                let (fec, _) = FecHeader::deserialize(&body[off..])?;
                if tag == PacketType::Fec {
                    Packet::Fec { video, fec }
                } else {
                    Packet::DupFec { video, fec }
                }
            }
            PacketType::Ack => Packet::Ack(AckHeader::deserialize(body)?.0),
            PacketType::FrameAck => Packet::FrameAck(FrameAckHeader::deserialize(body)?.0),
            PacketType::NetState => Packet::NetState(NetStateHeader::deserialize(body)?.0),
        })
    }

    /// The shared video header, for packet kinds that carry one.
    pub fn video_header(&self) -> Option<&VideoHeader> {
        match self {
            Packet::Data { video, .. } | Packet::Fec { video, .. } | Packet::DupFec { video, .. } => Some(video),
            _ => None,
        }
    }

    pub fn is_fec(&self) -> bool {
        matches!(self, Packet::Fec { .. } | Packet::DupFec { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_video() -> VideoHeader {
        VideoHeader {
            encode_time_ms: 1_234_567_890,
            global_id: 42,
            group_id: 7,
            group_data_num: 10,
            group_fec_num: 2,
            pkt_id_in_group: 3,
            batch_id: 9,
            batch_data_num: 10,
            batch_fec_num: 2,
            pkt_id_in_batch: 3,
            tx_count: 1,
        }
    }

    #[test]
    fn data_packet_roundtrips() {
        let pkt = Packet::Data {
            video: sample_video(),
            data: DataHeader { frame_id: 100, frame_pkt_num: 10, pkt_id_in_frame: 3 },
            payload: vec![1, 2, 3, 4, 5],
        };
        let bytes = pkt.serialize();
        assert_eq!(Packet::deserialize(&bytes).unwrap(), pkt);
    }

    #[test]
    fn fec_packet_roundtrips() {
        let pkt = Packet::Fec {
            video: sample_video(),
            fec: FecHeader {
                digests: vec![
                    FecDigest { pkt_id_in_batch: 0, pkt_id_in_group: 0, frame_id: 100, frame_pkt_num: 10, pkt_id_in_frame: 0 },
                    FecDigest { pkt_id_in_batch: 1, pkt_id_in_group: 1, frame_id: 100, frame_pkt_num: 10, pkt_id_in_frame: 1 },
                ],
            },
        };
        let bytes = pkt.serialize();
        assert_eq!(Packet::deserialize(&bytes).unwrap(), pkt);
    }

    #[test]
    fn dup_fec_tag_is_distinct_from_fec() {
        let video = sample_video();
        let fec = FecHeader { digests: vec![] };
        let a = Packet::Fec { video: video.clone(), fec: fec.clone() }.serialize();
        let b = Packet::DupFec { video, fec }.serialize();
        assert_ne!(a, b);
        assert!(matches!(Packet::deserialize(&b).unwrap(), Packet::DupFec { .. }));
    }

    #[test]
    fn ack_packet_roundtrips() {
        let pkt = Packet::Ack(AckHeader {
            acked: vec![(7, 3), (7, 4), (8, 0)],
            last_pkt_id: 99,
        });
        let bytes = pkt.serialize();
        assert_eq!(Packet::deserialize(&bytes).unwrap(), pkt);
    }

    #[test]
    fn frame_ack_roundtrips() {
        let pkt = Packet::FrameAck(FrameAckHeader { frame_id: 55, frame_encode_time_us: 123_456_789 });
        let bytes = pkt.serialize();
        assert_eq!(Packet::deserialize(&bytes).unwrap(), pkt);
    }

    #[test]
    fn net_state_roundtrips() {
        let pkt = Packet::NetState(NetStateHeader {
            loss_rate_bp: 250,
            throughput_kbps: 8000,
            fec_group_delay_us: 1500,
            loss_seq: vec![LossRun { sign: 1, magnitude: 12 }, LossRun { sign: -1, magnitude: 3 }],
            recv_samples: vec![ReceiveSample { pkt_id: 1, rt_us: 20_000 }, ReceiveSample { pkt_id: 2, rt_us: 20_500 }],
        });
        let bytes = pkt.serialize();
        assert_eq!(Packet::deserialize(&bytes).unwrap(), pkt);
    }

    #[test]
    fn truncated_buffer_is_an_error_not_a_panic() {
        let pkt = Packet::Ack(AckHeader { acked: vec![(1, 2)], last_pkt_id: 3 });
        let mut bytes = pkt.serialize();
        bytes.truncate(bytes.len() - 1);
        assert!(Packet::deserialize(&bytes).is_err());
    }

    #[test]
    fn unknown_type_tag_is_an_error() {
        let bytes = 999u32.to_be_bytes().to_vec();
        assert_eq!(Packet::deserialize(&bytes), Err(WireError::UnknownType(999)));
    }
}
