//! Receiver core: packet intake, per-group accounting, packet-ack
//! generation, and periodic network-state feedback. Grounded in
//! `packet-receiver.h`/`packet-receiver.cc`.

pub mod group;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use group::{GroupState, PacketGroup};

use crate::netstat::{ReceivedSample, ReceiverWindow};
use crate::wire::{AckHeader, FecDigest, NetStateHeader, Packet};

pub struct ReceivedEvent {
    pub decoded: Vec<FecDigest>,
    pub ack: AckHeader,
}

pub struct Receiver {
    groups: HashMap<u32, PacketGroup>,
    window: ReceiverWindow,
    delay_ddl: Duration,
    epoch: Instant,
    one_way_dispersion: Duration,
}

impl Receiver {
    pub fn new(delay_ddl: Duration, receiver_window: Duration, epoch: Instant) -> Self {
        Self {
            groups: HashMap::new(),
            window: ReceiverWindow::new(receiver_window),
            delay_ddl,
            epoch,
            one_way_dispersion: Duration::ZERO,
        }
    }

    fn now_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// Ingests one DATA/FEC/DupFec packet. Returns `None` for packets
    /// belonging to a group already `complete`/`timeout` (silently
    /// dropped per §7), or for packet kinds this receiver doesn't handle
    /// directly (Ack/FrameAck/NetState are the sender's own feedback).
    pub fn on_packet(&mut self, pkt: &Packet, payload_size: usize, now: Instant) -> Option<ReceivedEvent> {
        let video = pkt.video_header()?;
        let group_id = video.group_id;

        if let Some(existing) = self.groups.get(&group_id) {
            if existing.state != GroupState::InFlight {
                return None;
            }
        }

        let group = self
            .groups
            .entry(group_id)
            .or_insert_with(|| PacketGroup::new(group_id, video.group_data_num, video.encode_time_ms, now));

        let (data_digest, fec_digests): (Option<FecDigest>, &[FecDigest]) = match pkt {
            Packet::Data { data, .. } => (
                Some(FecDigest {
                    pkt_id_in_batch: video.pkt_id_in_batch,
                    pkt_id_in_group: video.pkt_id_in_group,
                    frame_id: data.frame_id,
                    frame_pkt_num: data.frame_pkt_num,
                    pkt_id_in_frame: data.pkt_id_in_frame,
                }),
                &[],
            ),
            Packet::Fec { fec, .. } | Packet::DupFec { fec, .. } => (None, fec.digests.as_slice()),
            _ => return None,
        };

        let was_complete = group.is_complete();
        let decoded = group.on_packet(video.pkt_id_in_group, video.tx_count, now, data_digest, fec_digests);

        if !was_complete && group.is_complete() && group.all_tx_zero {
            let span = group.last_rcv_time.saturating_duration_since(group.first_rcv_time);
            if group.group_data_num > 1 {
                let avg = span / (group.group_data_num as u32 - 1).max(1);
                self.one_way_dispersion = self.one_way_dispersion.mul_f64(0.8) + avg.mul_f64(0.2);
            }
        }

        self.window.on_packet(
            ReceivedSample { global_id: video.global_id, size_bytes: payload_size, receive_time: now },
            0,
        );

        let acked = decoded.iter().map(|d| (group_id, d.pkt_id_in_group)).collect();
        let ack = AckHeader { acked, last_pkt_id: video.global_id };
        Some(ReceivedEvent { decoded, ack })
    }

    /// Moves any `InFlight` group whose deadline has elapsed to `timeout`.
    /// Returns the `group_id`s that just timed out.
    pub fn sweep_timeouts(&mut self, now: Instant) -> Vec<u32> {
        let now_ms = self.now_ms(now);
        let delay_ddl_ms = self.delay_ddl.as_millis() as u64;
        let mut timed_out = Vec::new();
        for (&group_id, group) in self.groups.iter_mut() {
            if group.state == GroupState::InFlight && now_ms > group.encode_time_ms + delay_ddl_ms {
                group.state = GroupState::Timeout;
                timed_out.push(group_id);
            }
        }
        timed_out
    }

    /// Builds the periodic (16 ms) `NetStateHeader` feedback packet.
    pub fn net_state_report(&mut self) -> NetStateHeader {
        let report = self.window.report();
        NetStateHeader {
            loss_rate_bp: (report.avg_loss_rate * 10_000.0).round().clamp(0.0, u16::MAX as f64) as u16,
            throughput_kbps: report.throughput_kbps.round().clamp(0.0, u32::MAX as f64) as u32,
            fec_group_delay_us: self.one_way_dispersion.as_micros().min(u16::MAX as u128) as u16,
            loss_seq: report.loss_seq,
            recv_samples: report.recv_samples.into_iter().map(|s| crate::wire::ReceiveSample { pkt_id: s.pkt_id, rt_us: s.rt_us }).collect(),
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DataHeader, VideoHeader};

    fn video(group_id: u32, pkt_id_in_group: u16, group_data_num: u16) -> VideoHeader {
        VideoHeader {
            encode_time_ms: 0,
            global_id: pkt_id_in_group,
            group_id,
            group_data_num,
            group_fec_num: 0,
            pkt_id_in_group,
            batch_id: 0,
            batch_data_num: group_data_num,
            batch_fec_num: 0,
            pkt_id_in_batch: pkt_id_in_group,
            tx_count: 0,
        }
    }

    #[test]
    fn data_packet_produces_an_ack_and_decoded_entry() {
        let now = Instant::now();
        let mut r = Receiver::new(Duration::from_millis(100), Duration::from_millis(32), now);
        let pkt = Packet::Data {
            video: video(0, 0, 2),
            data: DataHeader { frame_id: 1, frame_pkt_num: 2, pkt_id_in_frame: 0 },
            payload: vec![1, 2, 3],
        };
        let event = r.on_packet(&pkt, 3, now).unwrap();
        assert_eq!(event.decoded.len(), 1);
        assert_eq!(event.ack.acked, vec![(0, 0)]);
    }

    #[test]
    fn fec_completion_acks_every_newly_decoded_position_not_just_the_arrival() {
        use crate::wire::{FecDigest, FecHeader};

        let now = Instant::now();
        let mut r = Receiver::new(Duration::from_millis(100), Duration::from_millis(32), now);
        for i in 0..2u16 {
            let pkt = Packet::Data {
                video: video(0, i, 3),
                data: DataHeader { frame_id: 1, frame_pkt_num: 3, pkt_id_in_frame: i },
                payload: vec![],
            };
            let event = r.on_packet(&pkt, 0, now).unwrap();
            assert_eq!(event.ack.acked, vec![(0, i)]);
        }

        // The third and final distinct arrival is a FEC packet: it completes
        // the group and recovers position 2 without ever receiving it
        // directly, so the ack must reference position 2, not the FEC
        // packet's own (non-data) slot.
        let fec_video = video(0, 2, 3);
        let fec_pkt = Packet::Fec {
            video: fec_video,
            fec: FecHeader {
                digests: vec![FecDigest { pkt_id_in_batch: 2, pkt_id_in_group: 2, frame_id: 1, frame_pkt_num: 3, pkt_id_in_frame: 2 }],
            },
        };
        let event = r.on_packet(&fec_pkt, 0, now).unwrap();
        assert_eq!(event.decoded.len(), 1);
        assert_eq!(event.ack.acked, vec![(0, 2)]);
    }

    #[test]
    fn dropped_packets_for_timed_out_groups_are_ignored() {
        let now = Instant::now();
        let mut r = Receiver::new(Duration::from_millis(10), Duration::from_millis(32), now);
        let pkt = Packet::Data {
            video: video(0, 0, 2),
            data: DataHeader { frame_id: 1, frame_pkt_num: 2, pkt_id_in_frame: 0 },
            payload: vec![],
        };
        r.on_packet(&pkt, 0, now).unwrap();
        let later = now + Duration::from_millis(50);
        assert_eq!(r.sweep_timeouts(later), vec![0]);
        assert!(r.on_packet(&pkt, 0, later).is_none());
    }

    #[test]
    fn group_never_flips_between_complete_and_timeout() {
        let now = Instant::now();
        let mut r = Receiver::new(Duration::from_millis(100), Duration::from_millis(32), now);
        for i in 0..2u16 {
            let pkt = Packet::Data {
                video: video(0, i, 2),
                data: DataHeader { frame_id: 1, frame_pkt_num: 2, pkt_id_in_frame: i },
                payload: vec![],
            };
            r.on_packet(&pkt, 0, now).unwrap();
        }
        let later = now + Duration::from_millis(200);
        assert!(r.sweep_timeouts(later).is_empty());
    }
}
