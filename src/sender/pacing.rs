//! Pacing queue: a FIFO of frames, each a list of already-built video
//! packets. Retransmission frames are inserted at the front. Grounded in
//! `PacketFrame` (`packet-sender.h`).

use std::collections::VecDeque;
use std::time::Duration;

use crate::wire::Packet;

/// One frame's worth of packets still waiting to be paced out.
pub struct PacedFrame {
    pub packets: VecDeque<Packet>,
    pub is_retransmission: bool,
    /// Time remaining until this frame's deadline, refreshed by the
    /// caller whenever it recomputes the pacing interval.
    pub ddl_left: Duration,
}

impl PacedFrame {
    pub fn new(packets: Vec<Packet>, is_retransmission: bool, ddl_left: Duration) -> Self {
        Self { packets: packets.into(), is_retransmission, ddl_left }
    }
}

/// FIFO of [`PacedFrame`]s with a recomputed-on-change pacing interval.
/// With pacing disabled the queue is expected to be drained in a tight
/// loop by the caller rather than waiting on `interval`.
pub struct PacingQueue {
    frames: VecDeque<PacedFrame>,
    interval: Duration,
    pub pacing_enabled: bool,
}

impl PacingQueue {
    pub fn new(pacing_enabled: bool) -> Self {
        Self { frames: VecDeque::new(), interval: Duration::ZERO, pacing_enabled }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(|f| f.packets.is_empty())
    }

    pub fn push_back(&mut self, frame: PacedFrame) {
        self.frames.push_back(frame);
        self.recompute_interval();
    }

    pub fn push_front(&mut self, frame: PacedFrame) {
        self.frames.push_front(frame);
        self.recompute_interval();
    }

    /// Pops the head frame's next packet, dropping the frame once
    /// exhausted. Returns `None` if the queue is empty.
    pub fn pop_next(&mut self) -> Option<Packet> {
        while let Some(front) = self.frames.front_mut() {
            if let Some(pkt) = front.packets.pop_front() {
                if front.packets.is_empty() {
                    self.frames.pop_front();
                }
                self.recompute_interval();
                return Some(pkt);
            }
            self.frames.pop_front();
        }
        None
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `min(prev_interval, ddl_left_for_head / packets_remaining_in_head)`,
    /// recomputed whenever the queue changes.
    fn recompute_interval(&mut self) {
        if !self.pacing_enabled {
            self.interval = Duration::ZERO;
            return;
        }
        let Some(front) = self.frames.front() else {
            return;
        };
        let remaining = front.packets.len().max(1) as u32;
        let candidate = front.ddl_left / remaining;
        self.interval = self.interval.min(candidate).max(Duration::from_micros(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FrameAckHeader};

    fn dummy_packet() -> Packet {
        Packet::FrameAck(FrameAckHeader { frame_id: 0, frame_encode_time_us: 0 })
    }

    #[test]
    fn retransmission_frames_go_to_the_front() {
        let mut q = PacingQueue::new(false);
        q.push_back(PacedFrame::new(vec![dummy_packet()], false, Duration::from_millis(10)));
        q.push_front(PacedFrame::new(vec![dummy_packet(), dummy_packet()], true, Duration::from_millis(5)));
        assert_eq!(q.frames.len(), 2);
        assert!(q.frames.front().unwrap().is_retransmission);
    }

    #[test]
    fn pop_next_drains_across_frame_boundaries() {
        let mut q = PacingQueue::new(false);
        q.push_back(PacedFrame::new(vec![dummy_packet()], false, Duration::from_millis(10)));
        q.push_back(PacedFrame::new(vec![dummy_packet()], false, Duration::from_millis(10)));
        assert!(q.pop_next().is_some());
        assert!(q.pop_next().is_some());
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn disabled_pacing_keeps_interval_at_zero() {
        let mut q = PacingQueue::new(false);
        q.push_back(PacedFrame::new(vec![dummy_packet()], false, Duration::from_millis(10)));
        assert_eq!(q.interval(), Duration::ZERO);
    }

    #[test]
    fn interval_never_increases_across_recomputes() {
        let mut q = PacingQueue::new(true);
        q.push_back(PacedFrame::new(vec![dummy_packet(), dummy_packet()], false, Duration::from_millis(20)));
        let first = q.interval();
        q.push_back(PacedFrame::new(vec![dummy_packet()], false, Duration::from_millis(1)));
        let second = q.interval();
        assert!(second <= first);
    }
}
