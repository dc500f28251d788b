//! Sender-side loss estimation and goodput/CC-quota bookkeeping. Grounded
//! in `PacketSender::UpdateGoodputRatio` plus the
//! `m_goodput_wnd`/`goodput_pkts_inwnd`/`total_pkts_inwnd` fields
//! (`packet-sender.h`).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Two time-keyed event counts (sends, retransmits), both trimmed to a
/// rolling measurement window. `cur_loss_rate` is the ratio fed to FEC
/// policies.
pub struct LossEstimator {
    window: Duration,
    sends: VecDeque<(Instant, u32)>,
    retx: VecDeque<(Instant, u32)>,
}

impl LossEstimator {
    pub fn new(window: Duration) -> Self {
        Self { window, sends: VecDeque::new(), retx: VecDeque::new() }
    }

    pub fn on_send(&mut self, now: Instant, count: u32) {
        self.sends.push_back((now, count));
        trim(&mut self.sends, now, self.window);
    }

    pub fn on_retransmit(&mut self, now: Instant, count: u32) {
        self.retx.push_back((now, count));
        trim(&mut self.retx, now, self.window);
    }

    pub fn cur_loss_rate(&self) -> f64 {
        let sent: u32 = self.sends.iter().map(|(_, c)| c).sum();
        let retx: u32 = self.retx.iter().map(|(_, c)| c).sum();
        if sent > 0 {
            retx as f64 / sent as f64
        } else if retx > 0 {
            1.0
        } else {
            0.0
        }
    }
}

fn trim(list: &mut VecDeque<(Instant, u32)>, now: Instant, window: Duration) {
    while let Some(&(t, _)) = list.front() {
        if now.saturating_duration_since(t) > window {
            list.pop_front();
        } else {
            break;
        }
    }
}

/// Tracks the fraction of in-flight packets that count toward "goodput"
/// (original, non-redundant data) over a short window, and the admission
/// quota derived from a congestion controller's target bitrate.
pub struct GoodputTracker {
    window: Duration,
    samples: VecDeque<(Instant, bool)>,
}

impl GoodputTracker {
    pub fn new(window: Duration) -> Self {
        Self { window, samples: VecDeque::new() }
    }

    pub fn on_packet(&mut self, now: Instant, is_goodput: bool) {
        self.samples.push_back((now, is_goodput));
        while let Some(&(t, _)) = self.samples.front() {
            if now.saturating_duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let goodput = self.samples.iter().filter(|(_, g)| *g).count();
        goodput as f64 / self.samples.len() as f64
    }
}

/// Computes the per-frame admission quota in packets from a congestion
/// controller's target bitrate: `cca_quota_pkt = target_bps / (8 * fps *
/// max_data_payload)`, clamped to 50.
pub fn cca_quota_pkt(target_bps: u64, fps: u32, max_data_payload: usize) -> u32 {
    if fps == 0 || max_data_payload == 0 {
        return 0;
    }
    let quota = target_bps / (8 * fps as u64 * max_data_payload as u64);
    quota.min(50) as u32
}

/// The halved encoder target used after a quota update, per the same
/// section's "encoder bitrate is set to 0.5 * target_bps" rule.
pub fn encoder_target_bps(target_bps: u64) -> u64 {
    target_bps / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_rate_is_zero_with_no_events() {
        let est = LossEstimator::new(Duration::from_secs(1));
        assert_eq!(est.cur_loss_rate(), 0.0);
    }

    #[test]
    fn loss_rate_tracks_retx_over_sends() {
        let mut est = LossEstimator::new(Duration::from_secs(1));
        let now = Instant::now();
        est.on_send(now, 100);
        est.on_retransmit(now, 5);
        assert!((est.cur_loss_rate() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn loss_rate_is_one_when_only_retx_observed() {
        let mut est = LossEstimator::new(Duration::from_secs(1));
        est.on_retransmit(Instant::now(), 3);
        assert_eq!(est.cur_loss_rate(), 1.0);
    }

    #[test]
    fn old_events_fall_out_of_the_window() {
        let mut est = LossEstimator::new(Duration::from_millis(100));
        let t0 = Instant::now();
        est.on_send(t0, 10);
        est.on_retransmit(t0, 10);
        est.on_send(t0 + Duration::from_millis(200), 10);
        assert_eq!(est.cur_loss_rate(), 0.0);
    }

    #[test]
    fn quota_is_clamped_to_fifty() {
        assert_eq!(cca_quota_pkt(1_000_000_000, 30, 1400), 50);
    }

    #[test]
    fn encoder_target_is_halved() {
        assert_eq!(encoder_target_bps(2_000_000), 1_000_000);
    }
}
