//! Decoder façade: per-frame completion tracking and deadline-miss
//! accounting. Grounded in the `VideoFrame`/`unplayed_frames`/
//! `played_frames` bookkeeping in `client.h`.

use std::collections::{HashMap, HashSet};

use crate::wire::FrameAckHeader;

struct VideoFrame {
    frame_pkt_num: u16,
    encode_time_us: u64,
    pkts_received: HashSet<u16>,
}

/// Tracks which frames have every data packet delivered or reconstructed,
/// emitting a `FrameAckHeader` the moment a frame completes.
pub struct Decoder {
    unplayed_frames: HashMap<u32, VideoFrame>,
    played_frames: HashSet<u32>,
    total_frames_seen: HashSet<u32>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self { unplayed_frames: HashMap::new(), played_frames: HashSet::new(), total_frames_seen: HashSet::new() }
    }

    /// Feeds one decoded (received or FEC-reconstructed) data packet.
    /// Returns a `FrameAckHeader` the instant its frame becomes complete.
    pub fn on_data_decoded(
        &mut self,
        frame_id: u32,
        frame_pkt_num: u16,
        pkt_id_in_frame: u16,
        encode_time_us: u64,
    ) -> Option<FrameAckHeader> {
        if self.played_frames.contains(&frame_id) {
            return None;
        }
        self.total_frames_seen.insert(frame_id);

        let frame = self
            .unplayed_frames
            .entry(frame_id)
            .or_insert_with(|| VideoFrame { frame_pkt_num, encode_time_us, pkts_received: HashSet::new() });
        frame.pkts_received.insert(pkt_id_in_frame);

        if frame.pkts_received.len() as u16 >= frame.frame_pkt_num {
            let frame = self.unplayed_frames.remove(&frame_id).unwrap();
            self.played_frames.insert(frame_id);
            Some(FrameAckHeader { frame_id, frame_encode_time_us: frame.encode_time_us })
        } else {
            None
        }
    }

    pub fn is_played(&self, frame_id: u32) -> bool {
        self.played_frames.contains(&frame_id)
    }

    pub fn unplayed_count(&self) -> usize {
        self.unplayed_frames.len()
    }

    /// `unplayed_at_stop / total_frames_seen`.
    pub fn deadline_miss_ratio(&self) -> f64 {
        if self.total_frames_seen.is_empty() {
            return 0.0;
        }
        self.unplayed_frames.len() as f64 / self.total_frames_seen.len() as f64
    }
}
