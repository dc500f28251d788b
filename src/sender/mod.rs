//! Sender core: turns encoded frame byte counts into groups/batches of
//! data+FEC packets, paces them out, tracks unacked history, and detects
//! loss via dup-ack/PTO plus delayed retransmit. Grounded in
//! `packet-sender.h`/`packet-sender.cc`.

pub mod loss;
pub mod pacing;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::history::{DataPacket, History, HistoryEntry, PacketState};
use crate::id::wrapping_lt_u16;
use crate::netstat::{NetStat, RttEstimator};
use crate::policy::Policy;
use crate::wire::{AckHeader, DataHeader, FecDigest, FecHeader, NetStateHeader, Packet, VideoHeader};

use loss::LossEstimator;
use pacing::{PacedFrame, PacingQueue};

/// Which retransmit-trigger regime governs `rto` in [`Sender::check_retransmission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtxPolicyKind {
    DupAck,
    Pto,
}

pub struct SenderConfig {
    pub max_data_payload: usize,
    pub delay_ddl: Duration,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub max_group_size: u16,
    pub rtx_policy: RtxPolicyKind,
    pub loss_window: Duration,
    pub epoch: Instant,
}

struct GroupMeta {
    frame_id: u32,
    encode_time_ms: u64,
}

/// Turns frames into paced wire packets and reacts to acks/frame-acks,
/// owning the unacked history and loss/RTT estimators.
pub struct Sender {
    policy: Policy,
    history: History,
    pub pacing: PacingQueue,
    rtt: RttEstimator,
    loss: LossEstimator,
    cfg: SenderConfig,

    cur_bw_mbps: f64,
    one_way_dispersion: Duration,

    next_global_id: u16,
    next_data_global_id: u16,
    next_group_id: u32,
    next_batch_id: u32,
    next_frame_id: u32,

    frame_groups: HashMap<u32, Vec<u32>>,
    group_meta: HashMap<u32, GroupMeta>,
    delayed_rtx: HashMap<u32, Instant>,

    cur_rx_highest_global_id: u16,
    cur_cont_rx_highest_global_id: u16,
    cur_rx_highest_data_global_id: u16,
    is_recovery: bool,
}

impl Sender {
    pub fn new(policy: Policy, cfg: SenderConfig) -> Self {
        Self {
            policy,
            history: History::new(),
            pacing: PacingQueue::new(true),
            rtt: RttEstimator::new(),
            loss: LossEstimator::new(cfg.loss_window),
            cur_bw_mbps: 0.0,
            one_way_dispersion: Duration::ZERO,
            next_global_id: 0,
            next_data_global_id: 0,
            next_group_id: 0,
            next_batch_id: 0,
            next_frame_id: 0,
            frame_groups: HashMap::new(),
            group_meta: HashMap::new(),
            delayed_rtx: HashMap::new(),
            cur_rx_highest_global_id: 0,
            cur_cont_rx_highest_global_id: 0,
            cur_rx_highest_data_global_id: 0,
            is_recovery: false,
            cfg,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    fn now_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.cfg.epoch).as_millis() as u64
    }

    fn age(&self, encode_time_ms: u64, now: Instant) -> Duration {
        let elapsed_ms = self.now_ms(now).saturating_sub(encode_time_ms);
        Duration::from_millis(elapsed_ms)
    }

    fn stats(&self) -> NetStat {
        self.rtt.snapshot(self.cur_bw_mbps, self.loss.cur_loss_rate(), self.one_way_dispersion)
    }

    /// Feeds a receiver-emitted `NetStateHeader` into the sender's view of
    /// the network (bandwidth and one-way dispersion).
    pub fn on_net_state(&mut self, ns: &NetStateHeader) {
        self.cur_bw_mbps = ns.throughput_kbps as f64 / 1000.0;
        self.one_way_dispersion = Duration::from_micros(ns.fec_group_delay_us as u64);
    }

    /// Splits `encoded_size_bytes` into data packets, groups them under
    /// FEC per the configured policy, and enqueues the resulting frame at
    /// the back of the pacing queue. Returns the `group_id`s created.
    pub fn send_frame(&mut self, encoded_size_bytes: usize, now: Instant) -> Vec<u32> {
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let frame_pkt_num = encoded_size_bytes.div_ceil(self.cfg.max_data_payload).max(1) as u16;
        let encode_time_ms = self.now_ms(now);

        let stats = self.stats();
        let ddl_ms = self.cfg.delay_ddl.as_millis() as u16;

        let mut remaining = frame_pkt_num;
        let mut pkt_id_in_frame: u16 = 0;
        let mut group_ids = Vec::new();
        let mut packets = Vec::new();
        let mut bytes_left = encoded_size_bytes;

        while remaining > 0 {
            let is_tail = remaining <= self.cfg.max_group_size;
            let call_max_group = if is_tail { remaining } else { self.cfg.max_group_size };
            let frame_size_for_policy = call_max_group.min(u8::MAX as u16) as u8;

            let (returned_group_size, fec_rate) = self.policy.decide(
                &stats,
                self.cfg.bitrate_kbps,
                ddl_ms,
                ddl_ms,
                false,
                frame_size_for_policy,
                call_max_group,
                is_tail,
            );
            let group_data_num = if is_tail { remaining } else { returned_group_size.min(remaining).max(1) };
            let fec_count = ((group_data_num as f64) * fec_rate).round() as u16;

            let group_id = self.next_group_id;
            self.next_group_id += 1;
            let batch_id = self.next_batch_id;
            self.next_batch_id += 1;
            group_ids.push(group_id);
            self.group_meta.insert(group_id, GroupMeta { frame_id, encode_time_ms });

            let mut digests = Vec::with_capacity(group_data_num as usize);
            for i in 0..group_data_num {
                let global_id = self.next_global_id;
                self.next_global_id = self.next_global_id.wrapping_add(1);
                let data_global_id = self.next_data_global_id;
                self.next_data_global_id = self.next_data_global_id.wrapping_add(1);

                let payload_len = self.cfg.max_data_payload.min(bytes_left).max(1);
                bytes_left = bytes_left.saturating_sub(payload_len);
                let payload = vec![0u8; payload_len];

                let video = VideoHeader {
                    encode_time_ms,
                    global_id,
                    group_id,
                    group_data_num,
                    group_fec_num: fec_count,
                    pkt_id_in_group: i,
                    batch_id,
                    batch_data_num: group_data_num,
                    batch_fec_num: fec_count,
                    pkt_id_in_batch: i,
                    tx_count: 0,
                };
                let data_hdr = DataHeader { frame_id, frame_pkt_num, pkt_id_in_frame };
                digests.push(FecDigest {
                    pkt_id_in_batch: i,
                    pkt_id_in_group: i,
                    frame_id,
                    frame_pkt_num,
                    pkt_id_in_frame,
                });

                self.history.insert(
                    HistoryEntry {
                        seq: 0,
                        group_id,
                        pkt_id_in_group: i,
                        data_global_id,
                        global_id,
                        batch_id,
                        state: PacketState::InFlight,
                        send_time: now,
                        encode_time_ms,
                    },
                    DataPacket { frame_id, frame_pkt_num, pkt_id_in_frame, payload: payload.clone(), tx_count: 0 },
                );

                packets.push(Packet::Data { video, data: data_hdr, payload });
                pkt_id_in_frame += 1;
            }

            for j in 0..fec_count {
                let global_id = self.next_global_id;
                self.next_global_id = self.next_global_id.wrapping_add(1);
                let pos = group_data_num + j;
                let video = VideoHeader {
                    encode_time_ms,
                    global_id,
                    group_id,
                    group_data_num,
                    group_fec_num: fec_count,
                    pkt_id_in_group: pos,
                    batch_id,
                    batch_data_num: group_data_num,
                    batch_fec_num: fec_count,
                    pkt_id_in_batch: pos,
                    tx_count: 0,
                };
                packets.push(Packet::Fec { video, fec: FecHeader { digests: digests.clone() } });
            }

            remaining -= group_data_num;
        }

        self.loss.on_send(now, frame_pkt_num as u32);
        self.frame_groups.insert(frame_id, group_ids.clone());
        self.pacing.push_back(PacedFrame::new(packets, false, self.cfg.delay_ddl));
        group_ids
    }

    /// Re-sends every still-unacked data packet in `group_id` as a fresh
    /// rtx batch with newly-computed FEC. Returns `None` if nothing in
    /// that group is still outstanding.
    pub fn retransmit_group(&mut self, group_id: u32, now: Instant) -> Option<()> {
        let members = self.history.group_members(group_id);
        if members.is_empty() {
            return None;
        }
        let encode_time_ms = self.group_meta.get(&group_id).map(|m| m.encode_time_ms).unwrap_or(0);
        let stats = self.stats();
        let ddl_ms = self.cfg.delay_ddl.as_millis() as u16;
        let age = self.age(encode_time_ms, now);
        let ddl_left_ms = (self.cfg.delay_ddl.saturating_sub(age)).as_millis() as u16;

        let group_data_num = members.len() as u16;
        let frame_size_for_policy = group_data_num.min(u8::MAX as u16) as u8;
        let (_, fec_rate) = self.policy.decide(
            &stats,
            self.cfg.bitrate_kbps,
            ddl_ms,
            ddl_left_ms,
            true,
            frame_size_for_policy,
            group_data_num,
            true,
        );
        let fec_count = ((group_data_num as f64) * fec_rate).round() as u16;
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;

        let mut digests = Vec::with_capacity(group_data_num as usize);
        let mut packets = Vec::with_capacity(group_data_num as usize + fec_count as usize);

        for (i, (entry, data_packet)) in members.into_iter().enumerate() {
            let i = i as u16;
            let global_id = self.next_global_id;
            self.next_global_id = self.next_global_id.wrapping_add(1);
            let tx_count = data_packet.tx_count.saturating_add(1);

            let video = VideoHeader {
                encode_time_ms,
                global_id,
                group_id,
                group_data_num,
                group_fec_num: fec_count,
                pkt_id_in_group: entry.pkt_id_in_group,
                batch_id,
                batch_data_num: group_data_num,
                batch_fec_num: fec_count,
                pkt_id_in_batch: i,
                tx_count,
            };
            let data_hdr = DataHeader {
                frame_id: data_packet.frame_id,
                frame_pkt_num: data_packet.frame_pkt_num,
                pkt_id_in_frame: data_packet.pkt_id_in_frame,
            };
            digests.push(FecDigest {
                pkt_id_in_batch: i,
                pkt_id_in_group: entry.pkt_id_in_group,
                frame_id: data_packet.frame_id,
                frame_pkt_num: data_packet.frame_pkt_num,
                pkt_id_in_frame: data_packet.pkt_id_in_frame,
            });

            self.history.insert(
                HistoryEntry {
                    seq: 0,
                    group_id,
                    pkt_id_in_group: entry.pkt_id_in_group,
                    data_global_id: entry.data_global_id,
                    global_id,
                    batch_id,
                    state: PacketState::InFlight,
                    send_time: now,
                    encode_time_ms,
                },
                DataPacket {
                    frame_id: data_packet.frame_id,
                    frame_pkt_num: data_packet.frame_pkt_num,
                    pkt_id_in_frame: data_packet.pkt_id_in_frame,
                    payload: data_packet.payload.clone(),
                    tx_count,
                },
            );

            packets.push(Packet::Data { video, data: data_hdr, payload: data_packet.payload });
        }

        for j in 0..fec_count {
            let global_id = self.next_global_id;
            self.next_global_id = self.next_global_id.wrapping_add(1);
            let pos = group_data_num + j;
            let video = VideoHeader {
                encode_time_ms,
                global_id,
                group_id,
                group_data_num,
                group_fec_num: fec_count,
                pkt_id_in_group: pos,
                batch_id,
                batch_data_num: group_data_num,
                batch_fec_num: fec_count,
                pkt_id_in_batch: pos,
                tx_count: 0,
            };
            packets.push(Packet::DupFec { video, fec: FecHeader { digests: digests.clone() } });
        }

        self.loss.on_retransmit(now, group_data_num as u32);
        self.pacing.push_front(PacedFrame::new(packets, true, self.cfg.delay_ddl.saturating_sub(age)));
        Some(())
    }

    /// Applies a received `AckHeader`: evicts acked packets from history,
    /// feeds RTT/dispersion samples, and updates the three high-water
    /// trackers `check_retransmission`'s hole walk reads. `is_recovery` is
    /// a latch: it's set here the moment an ack's `global_id` (the
    /// all-packet-kinds counter, which also advances on FEC packets) jumps
    /// ahead of the last contiguous point, and stays set until
    /// `check_retransmission` clears it on finding the gap. Grounded in
    /// `GameServer::RcvACKPacket` (`game-server.cc`).
    pub fn on_ack(&mut self, ack: &AckHeader, now: Instant) {
        for &(group_id, pkt_id_in_group) in &ack.acked {
            if let Some(entry) = self.history.get_by_key(group_id, pkt_id_in_group) {
                let global_id = entry.global_id;
                let data_global_id = entry.data_global_id;
                let batch_id = entry.batch_id;
                let send_time = entry.send_time;

                if !self.is_recovery {
                    self.cur_cont_rx_highest_global_id = global_id;
                    if wrapping_lt_u16(self.cur_rx_highest_global_id.wrapping_add(1), global_id) {
                        self.is_recovery = true;
                    }
                }
                self.cur_rx_highest_global_id = global_id;

                if wrapping_lt_u16(self.cur_rx_highest_data_global_id, data_global_id) {
                    self.cur_rx_highest_data_global_id = data_global_id;
                }

                self.rtt.on_sample(now.saturating_duration_since(send_time));
                self.rtt.on_batch_ack(batch_id, now);
            }
            self.history.remove_by_key(group_id, pkt_id_in_group);
        }
    }

    /// Purges every history entry belonging to `frame_id`'s groups.
    pub fn on_frame_ack(&mut self, frame_id: u32) {
        if let Some(group_ids) = self.frame_groups.remove(&frame_id) {
            self.history.purge_groups(&group_ids);
            for group_id in group_ids {
                self.group_meta.remove(&group_id);
                self.delayed_rtx.remove(&group_id);
            }
        }
    }

    /// Periodic (1 ms) retransmission sweep: drops definitely-late
    /// packets from the head, then scans back-to-front for holes and
    /// schedules immediate or delayed retransmits. Returns the group_ids
    /// retransmitted this tick.
    pub fn check_retransmission(&mut self, now: Instant) -> Vec<u32> {
        let stats = self.stats();
        let min_rtt = if stats.min_rtt.is_zero() { Duration::ZERO } else { stats.min_rtt };
        let delay_ddl = self.cfg.delay_ddl;

        self.history.drop_consecutive_from_front(|entry| {
            let age = self.age(entry.encode_time_ms, now);
            age + min_rtt / 2 > delay_ddl
        });

        let mut scheduled: HashSet<u32> = HashSet::new();
        let mut has_hole = false;
        // Rolling comparison point for the data-only gap check below: seeded
        // from the persisted high-water mark, then updated to each visited
        // entry's own `data_global_id` as the walk moves from newest to
        // oldest — mirroring `lastDataGlobalId` in `CheckRetransmission`
        // (`game-server.cc`), which updates at the bottom of every loop
        // iteration regardless of which branch that iteration took.
        let mut last_data_global_id = self.cur_rx_highest_data_global_id;
        let entries: Vec<HistoryEntry> = self.history.iter_back_to_front().cloned().collect();

        for entry in &entries {
            if entry.state == PacketState::RcvdPrevData {
                last_data_global_id = entry.data_global_id;
                continue;
            }

            let age = self.age(entry.encode_time_ms, now);
            if age < min_rtt {
                last_data_global_id = entry.data_global_id;
                continue;
            }
            if scheduled.contains(&entry.group_id) {
                last_data_global_id = entry.data_global_id;
                continue;
            }

            if !has_hole {
                if wrapping_lt_u16(entry.data_global_id.wrapping_add(1), last_data_global_id) {
                    // A gap in the DATA-only sequence: a data packet was
                    // skipped outright, regardless of any FEC packets sent.
                    has_hole = true;
                } else if self.is_recovery && wrapping_lt_u16(entry.global_id, self.cur_cont_rx_highest_global_id) {
                    // data_global_id is continuous, but an all-packet-kinds
                    // gap means a FEC packet from this recovery episode is
                    // still missing.
                    has_hole = true;
                }
            }

            if has_hole {
                self.is_recovery = false;
                let fire_at = now + stats.rt_dispersion;
                self.delayed_rtx
                    .entry(entry.group_id)
                    .and_modify(|existing| *existing = (*existing).min(fire_at))
                    .or_insert(fire_at);
            } else {
                last_data_global_id = entry.data_global_id;
                continue;
            }

            let dispersion = stats.rt_dispersion;
            let half_ms = Duration::from_micros(500);
            let mut rto = if self.cfg.rtx_policy == RtxPolicyKind::Pto {
                (stats.srtt + stats.rtt_sd * 4).max(stats.srtt * 2) + dispersion + half_ms
            } else {
                Duration::from_secs(1) + dispersion + half_ms
            };
            let tx_count = self.history.payload_for(entry.group_id, entry.pkt_id_in_group).map(|p| p.tx_count).unwrap_or(0);
            if self.policy.name().starts_with("hairpin") && tx_count > 1 {
                rto = (stats.srtt + stats.rtt_sd * 4).max(stats.srtt.mul_f64(1.5));
            }

            if age >= rto {
                scheduled.insert(entry.group_id);
            }

            last_data_global_id = entry.data_global_id;
        }

        let mut fired = Vec::new();
        self.delayed_rtx.retain(|&group_id, &mut fire_at| {
            if fire_at <= now {
                fired.push(group_id);
                false
            } else {
                true
            }
        });
        for group_id in fired {
            scheduled.insert(group_id);
        }

        let mut retransmitted = Vec::new();
        for group_id in scheduled {
            if self.retransmit_group(group_id, now).is_some() {
                retransmitted.push(group_id);
            }
        }
        retransmitted
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{FixedPolicy, RtxOnlyPolicy};

    fn cfg(epoch: Instant) -> SenderConfig {
        SenderConfig {
            max_data_payload: 1000,
            delay_ddl: Duration::from_millis(100),
            fps: 60,
            bitrate_kbps: 10_000,
            max_group_size: 20,
            rtx_policy: RtxPolicyKind::DupAck,
            loss_window: Duration::from_secs(1),
            epoch,
        }
    }

    #[test]
    fn send_frame_splits_into_data_packets_respecting_max_payload() {
        let now = Instant::now();
        let mut sender = Sender::new(Policy::new(Box::new(FixedPolicy::new(0.0))), cfg(now));
        let group_ids = sender.send_frame(3500, now);
        assert!(!group_ids.is_empty());
        assert_eq!(sender.history_len(), 4);
    }

    #[test]
    fn on_ack_evicts_from_history() {
        let now = Instant::now();
        let mut sender = Sender::new(Policy::new(Box::new(FixedPolicy::new(0.0))), cfg(now));
        sender.send_frame(1000, now);
        assert_eq!(sender.history_len(), 1);
        sender.on_ack(&AckHeader { acked: vec![(0, 0)], last_pkt_id: 0 }, now);
        assert_eq!(sender.history_len(), 0);
    }

    #[test]
    fn on_frame_ack_purges_every_group_of_the_frame() {
        let now = Instant::now();
        let mut sender = Sender::new(Policy::new(Box::new(FixedPolicy::new(0.0))), cfg(now));
        sender.send_frame(1000, now);
        sender.on_frame_ack(0);
        assert_eq!(sender.history_len(), 0);
    }

    #[test]
    fn retransmit_group_bumps_tx_count_and_reuses_payload() {
        let now = Instant::now();
        let mut sender = Sender::new(Policy::new(Box::new(RtxOnlyPolicy)), cfg(now));
        sender.send_frame(1000, now);
        let later = now + Duration::from_millis(5);
        assert!(sender.retransmit_group(0, later).is_some());
        assert_eq!(sender.history_len(), 1);
    }

    #[test]
    fn retransmit_group_is_none_once_fully_acked() {
        let now = Instant::now();
        let mut sender = Sender::new(Policy::new(Box::new(RtxOnlyPolicy)), cfg(now));
        sender.send_frame(1000, now);
        sender.on_ack(&AckHeader { acked: vec![(0, 0)], last_pkt_id: 0 }, now);
        assert!(sender.retransmit_group(0, now).is_none());
    }

    #[test]
    fn recovery_latch_flags_a_global_id_gap_even_without_a_data_id_gap_at_the_seed() {
        let now = Instant::now();
        let mut sender = Sender::new(Policy::new(Box::new(FixedPolicy::new(1.0))), cfg(now));
        // 3 data packets (global_id/data_global_id 0, 1, 2) plus FEC packets
        // interspersed after them (global_id 3.. onward) — the FEC packets
        // never get a history entry of their own.
        sender.send_frame(2500, now);
        assert_eq!(sender.history_len(), 3);

        // Only the last of the three data packets is acked: both id spaces
        // jump from 0 straight to 2, so `is_recovery` latches.
        sender.on_ack(&AckHeader { acked: vec![(0, 2)], last_pkt_id: 2 }, now);
        assert!(sender.is_recovery);
        assert_eq!(sender.history_len(), 2);

        // The rolling data-id comparison alone is a boundary case here
        // (data_global_id 1 + 1 == the data high-water mark 2, not less
        // than it) — it's the separate, global_id/recovery-gated check
        // that must catch the still-missing packet at position 1.
        let later = now + Duration::from_millis(5);
        let retransmitted = sender.check_retransmission(later);
        assert_eq!(retransmitted, vec![0]);
        assert!(!sender.is_recovery, "the hole walk clears the latch once it finds the gap");
    }
}
