//! Per-group assembly state at the receiver. Grounded in
//! `packet-receiver.h`'s group bookkeeping.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::wire::FecDigest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    InFlight,
    Complete,
    Timeout,
}

/// Tracks one FEC group's received positions and which data packets have
/// been handed to the decoder. Recovery is an opaque predicate: a group
/// is recoverable once distinct received packets (data or FEC) reach
/// `group_data_num`.
pub struct PacketGroup {
    pub group_id: u32,
    pub group_data_num: u16,
    pub encode_time_ms: u64,
    pub state: GroupState,
    pub last_rcv_time: Instant,
    pub first_rcv_time: Instant,
    pub all_tx_zero: bool,
    received_positions: HashSet<u16>,
    decoded_data_positions: HashSet<u16>,
    digest_by_position: HashMap<u16, FecDigest>,
}

impl PacketGroup {
    pub fn new(group_id: u32, group_data_num: u16, encode_time_ms: u64, now: Instant) -> Self {
        Self {
            group_id,
            group_data_num,
            encode_time_ms,
            state: GroupState::InFlight,
            last_rcv_time: now,
            first_rcv_time: now,
            all_tx_zero: true,
            received_positions: HashSet::new(),
            decoded_data_positions: HashSet::new(),
            digest_by_position: HashMap::new(),
        }
    }

    /// Records one packet's arrival at position `pkt_id_in_group`.
    /// `data_digest` is `Some` when the packet itself is a DATA packet
    /// (its own frame position, known unconditionally); `fec_digests` are
    /// the digests carried by a FEC/DupFec arrival, which may reveal the
    /// frame position of data packets this group hasn't received yet.
    /// Returns the digests of every data packet newly considered decoded
    /// by this arrival (the packet itself, plus any unlocked by the group
    /// becoming recoverable).
    pub fn on_packet(
        &mut self,
        pkt_id_in_group: u16,
        tx_count: u8,
        now: Instant,
        data_digest: Option<FecDigest>,
        fec_digests: &[FecDigest],
    ) -> Vec<FecDigest> {
        self.received_positions.insert(pkt_id_in_group);
        self.last_rcv_time = now;
        if tx_count > 0 {
            self.all_tx_zero = false;
        }

        let mut newly_decoded = Vec::new();

        if let Some(digest) = data_digest {
            if self.decoded_data_positions.insert(pkt_id_in_group) {
                newly_decoded.push(digest.clone());
            }
            self.digest_by_position.insert(pkt_id_in_group, digest);
        }
        for digest in fec_digests {
            self.digest_by_position.entry(digest.pkt_id_in_group).or_insert_with(|| digest.clone());
        }

        if self.state == GroupState::InFlight && self.received_positions.len() >= self.group_data_num as usize {
            self.state = GroupState::Complete;
            for pos in 0..self.group_data_num {
                if self.decoded_data_positions.insert(pos) {
                    if let Some(digest) = self.digest_by_position.get(&pos) {
                        newly_decoded.push(digest.clone());
                    }
                }
            }
        }

        newly_decoded
    }

    pub fn is_complete(&self) -> bool {
        self.state == GroupState::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(pos: u16) -> FecDigest {
        FecDigest { pkt_id_in_batch: pos, pkt_id_in_group: pos, frame_id: 1, frame_pkt_num: 4, pkt_id_in_frame: pos }
    }

    #[test]
    fn direct_data_packet_decodes_immediately() {
        let now = Instant::now();
        let mut g = PacketGroup::new(0, 4, 0, now);
        let decoded = g.on_packet(0, 0, now, Some(digest(0)), &[]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(g.state, GroupState::InFlight);
    }

    #[test]
    fn group_completes_once_enough_distinct_packets_arrive() {
        let now = Instant::now();
        let mut g = PacketGroup::new(0, 4, 0, now);
        g.on_packet(0, 0, now, Some(digest(0)), &[]);
        g.on_packet(1, 0, now, Some(digest(1)), &[]);
        g.on_packet(2, 0, now, Some(digest(2)), &[]);
        // 4th arrival is a FEC packet carrying all four digests; recovers position 3.
        let decoded = g.on_packet(4, 0, now, None, &[digest(0), digest(1), digest(2), digest(3)]);
        assert_eq!(g.state, GroupState::Complete);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].pkt_id_in_group, 3);
    }

    #[test]
    fn duplicate_arrivals_do_not_double_decode() {
        let now = Instant::now();
        let mut g = PacketGroup::new(0, 2, 0, now);
        g.on_packet(0, 0, now, Some(digest(0)), &[]);
        let decoded = g.on_packet(0, 0, now, Some(digest(0)), &[]);
        assert!(decoded.is_empty());
    }
}
