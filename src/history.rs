//! Sender-side history: an ordered arena of unacked DATA packet
//! descriptors plus a secondary `(group_id, pkt_id_in_group)` index, and a
//! side table of the packet payloads needed to resend. An arena plus two
//! indices stands in for a chain of shared-ownership handles. Grounded in
//! `packet-sender.h`'s `SentPacketInfo`/`PacketFrame` bookkeeping.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    InFlight,
    /// An older transmission of this `(group_id, pkt_id_in_group)` that
    /// has since been superseded by an ack for a newer `global_id`; kept
    /// around (rather than dropped) so the hole-detection sweep does not
    /// mistake its absence for loss.
    RcvdPrevData,
}

/// One entry in the send-order history, independent of the resend payload.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub seq: u64,
    pub group_id: u32,
    pub pkt_id_in_group: u16,
    pub data_global_id: u16,
    pub global_id: u16,
    pub batch_id: u32,
    pub state: PacketState,
    pub send_time: Instant,
    pub encode_time_ms: u64,
}

/// Everything needed to rebuild a DATA packet for resend; kept separately
/// from [`HistoryEntry`] because multiple transmissions of the same
/// `(group, pkt)` can exist in `order` while only the latest payload
/// matters for a resend.
#[derive(Debug, Clone)]
pub struct DataPacket {
    pub frame_id: u32,
    pub frame_pkt_num: u16,
    pub pkt_id_in_frame: u16,
    pub payload: Vec<u8>,
    pub tx_count: u8,
}

pub struct History {
    order: VecDeque<u64>,
    entries: HashMap<u64, HistoryEntry>,
    index: HashMap<(u32, u16), u64>,
    payloads: HashMap<u32, HashMap<u16, DataPacket>>,
    next_seq: u64,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
            index: HashMap::new(),
            payloads: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a newly-sent DATA packet. If an older transmission of the
    /// same `(group_id, pkt_id_in_group)` is still live, it is flipped to
    /// [`PacketState::RcvdPrevData`] rather than removed, per §7's
    /// transient-inconsistency handling.
    pub fn insert(&mut self, mut entry: HistoryEntry, packet: DataPacket) -> u64 {
        let key = (entry.group_id, entry.pkt_id_in_group);
        if let Some(&old_seq) = self.index.get(&key) {
            if let Some(old) = self.entries.get_mut(&old_seq) {
                old.state = PacketState::RcvdPrevData;
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        entry.seq = seq;
        self.index.insert(key, seq);
        self.payloads.entry(entry.group_id).or_default().insert(entry.pkt_id_in_group, packet);
        self.order.push_back(seq);
        self.entries.insert(seq, entry);
        seq
    }

    pub fn get_by_key(&self, group_id: u32, pkt_id_in_group: u16) -> Option<&HistoryEntry> {
        self.index.get(&(group_id, pkt_id_in_group)).and_then(|seq| self.entries.get(seq))
    }

    pub fn payload_for(&self, group_id: u32, pkt_id_in_group: u16) -> Option<&DataPacket> {
        self.payloads.get(&group_id).and_then(|m| m.get(&pkt_id_in_group))
    }

    /// All still-unacked data packets belonging to `group_id`, in
    /// `pkt_id_in_group` order, with their resend payloads. Used by
    /// `retransmit_group`.
    pub fn group_members(&self, group_id: u32) -> Vec<(HistoryEntry, DataPacket)> {
        let mut out = Vec::new();
        if let Some(pkts) = self.payloads.get(&group_id) {
            let mut ids: Vec<u16> = pkts.keys().copied().collect();
            ids.sort_unstable();
            for pkt_id in ids {
                if let Some(entry) = self.get_by_key(group_id, pkt_id) {
                    if entry.state == PacketState::InFlight {
                        out.push((entry.clone(), pkts[&pkt_id].clone()));
                    }
                }
            }
        }
        out
    }

    fn remove_seq(&mut self, seq: u64) -> Option<HistoryEntry> {
        let entry = self.entries.remove(&seq)?;
        let key = (entry.group_id, entry.pkt_id_in_group);
        if self.index.get(&key) == Some(&seq) {
            self.index.remove(&key);
            if let Some(group_payloads) = self.payloads.get_mut(&entry.group_id) {
                group_payloads.remove(&entry.pkt_id_in_group);
                if group_payloads.is_empty() {
                    self.payloads.remove(&entry.group_id);
                }
            }
        }
        Some(entry)
    }

    /// Removes the `(group_id, pkt_id_in_group)` entry outright — used
    /// when an ack arrives for a packet still at `InFlight`.
    pub fn remove_by_key(&mut self, group_id: u32, pkt_id_in_group: u16) -> Option<HistoryEntry> {
        let seq = *self.index.get(&(group_id, pkt_id_in_group))?;
        self.remove_seq(seq)
    }

    pub fn mark_rcvd_prev(&mut self, group_id: u32, pkt_id_in_group: u16) {
        if let Some(&seq) = self.index.get(&(group_id, pkt_id_in_group)) {
            if let Some(entry) = self.entries.get_mut(&seq) {
                entry.state = PacketState::RcvdPrevData;
            }
        }
    }

    /// Purges every history entry belonging to `group_id`'s frame — the
    /// caller supplies the set of `group_id`s that belong to the acked
    /// frame (the frame→group relationship lives in the sender, not here).
    pub fn purge_groups(&mut self, group_ids: &[u32]) {
        let victims: Vec<u64> = self
            .entries
            .values()
            .filter(|e| group_ids.contains(&e.group_id))
            .map(|e| e.seq)
            .collect();
        for seq in victims {
            self.remove_seq(seq);
        }
    }

    fn compact_front(&mut self) {
        while let Some(&seq) = self.order.front() {
            if self.entries.contains_key(&seq) {
                break;
            }
            self.order.pop_front();
        }
    }

    /// From oldest forward, drop packets whose state is `RcvdPrevData` or
    /// that will definitely miss the deadline, per `should_drop`. Stops at
    /// the first packet that should not be dropped.
    pub fn drop_consecutive_from_front(&mut self, mut should_drop: impl FnMut(&HistoryEntry) -> bool) -> usize {
        let mut dropped = 0;
        loop {
            self.compact_front();
            let Some(&seq) = self.order.front() else { break };
            let entry = self.entries.get(&seq).expect("compacted front is live");
            if entry.state == PacketState::RcvdPrevData || should_drop(entry) {
                self.order.pop_front();
                self.remove_seq(seq);
                dropped += 1;
            } else {
                break;
            }
        }
        dropped
    }

    /// Walks the live history from newest to oldest, in send order.
    pub fn iter_back_to_front(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.order.iter().rev().filter_map(move |seq| self.entries.get(seq))
    }

    /// Walks the live history from oldest to newest, in send order.
    pub fn iter_front_to_back(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.order.iter().filter_map(move |seq| self.entries.get(seq))
    }
}
