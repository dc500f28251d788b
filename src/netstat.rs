//! Network-state estimation: the sender-side aggregated view fed into FEC
//! policies (`NetStat`), the sender's RTT/variance/dispersion tracker, and
//! the receiver's sliding-window loss/throughput/dispersion estimator that
//! produces the periodic `NetStateHeader` feedback.

use std::time::Duration;

use crate::id::wrapping_lt_u16;

/// Sender-side aggregated view of the network, passed into
/// [`crate::policy::FecPolicy::decide`]. Field names follow
/// `FECPolicy::NetStat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetStat {
    pub cur_rtt: Duration,
    pub srtt: Duration,
    pub min_rtt: Duration,
    pub rtt_sd: Duration,
    /// Mbps.
    pub cur_bw: f64,
    pub cur_loss_rate: f64,
    pub one_way_dispersion: Duration,
    pub rt_dispersion: Duration,
}

/// Jacobson/Karels RTT estimator (alpha=1/8, beta=1/4), with a running
/// minimum and a round-trip dispersion IIR on top.
///
/// Dispersion here tracks the time between acks of consecutive packets
/// sent in the same batch, via a first-order IIR (0.2 new, 0.8 old).
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    min_rtt: Duration,
    cur_rtt: Duration,
    rt_dispersion: Duration,
    last_batch_ack: Option<(u32, std::time::Instant)>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            min_rtt: Duration::MAX,
            cur_rtt: Duration::ZERO,
            rt_dispersion: Duration::ZERO,
            last_batch_ack: None,
        }
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fresh RTT sample (from an ack round trip).
    pub fn on_sample(&mut self, sample: Duration) {
        self.cur_rtt = sample;
        self.min_rtt = self.min_rtt.min(sample);
        self.srtt = Some(match self.srtt {
            None => {
                self.rttvar = sample / 2;
                sample
            }
            Some(prev) => {
                let diff = if prev > sample { prev - sample } else { sample - prev };
                self.rttvar = self.rttvar * 3 / 4 + diff / 4;
                prev * 7 / 8 + sample / 8
            }
        });
    }

    /// Feed the receive time of an ack for a packet in `batch_id`; updates
    /// the round-trip dispersion IIR when the previous ack was from the
    /// same batch.
    pub fn on_batch_ack(&mut self, batch_id: u32, now: std::time::Instant) {
        if let Some((prev_batch, prev_time)) = self.last_batch_ack {
            if prev_batch == batch_id && now >= prev_time {
                let gap = now - prev_time;
                self.rt_dispersion = self.rt_dispersion.mul_f64(0.8) + gap.mul_f64(0.2);
            }
        }
        self.last_batch_ack = Some((batch_id, now));
    }

    pub fn snapshot(&self, cur_bw: f64, cur_loss_rate: f64, one_way_dispersion: Duration) -> NetStat {
        NetStat {
            cur_rtt: self.cur_rtt,
            srtt: self.srtt.unwrap_or(Duration::ZERO),
            min_rtt: if self.min_rtt == Duration::MAX { Duration::ZERO } else { self.min_rtt },
            rtt_sd: self.rttvar,
            cur_bw,
            cur_loss_rate,
            one_way_dispersion,
            rt_dispersion: self.rt_dispersion,
        }
    }
}

/// One packet observation fed to the receiver's sliding-window estimator.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedSample {
    pub global_id: u16,
    pub size_bytes: usize,
    pub receive_time: std::time::Instant,
}

/// Receiver-side sliding window over recently received packets, producing
/// the fields of [`crate::wire::NetStateHeader`] every feedback interval.
/// Default window is 32 ms, feedback is emitted every 16 ms.
pub struct ReceiverWindow {
    window: Duration,
    samples: std::collections::VecDeque<ReceivedSample>,
    /// Highest `global_id` observed, for missing-id accounting within the
    /// window; `None` until the first sample arrives.
    highest_id: Option<u16>,
    /// Samples accumulated since the last feedback emission, in arrival
    /// order, carried in the next `NetStateHeader.recv_samples`.
    since_last_feedback: Vec<ReceiveSampleRecord>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiveSampleRecord {
    pub pkt_id: u32,
    pub rt_us: u32,
}

impl ReceiverWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: std::collections::VecDeque::new(),
            highest_id: None,
            since_last_feedback: Vec::new(),
        }
    }

    pub fn on_packet(&mut self, sample: ReceivedSample, round_trip_us: u32) {
        let now = sample.receive_time;
        self.samples.push_back(sample);
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.receive_time) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.highest_id = Some(match self.highest_id {
            Some(h) if !wrapping_lt_u16(h, sample.global_id) => h,
            _ => sample.global_id,
        });
        self.since_last_feedback.push(ReceiveSampleRecord { pkt_id: sample.global_id as u32, rt_us: round_trip_us });
    }

    /// Builds a `NetStateHeader`-ready report and clears the per-feedback
    /// sample buffer. The loss-sequence run-length-encoding walks packets
    /// by id order within the window, treating unseen ids between the
    /// lowest and highest observed as losses.
    pub fn report(&mut self) -> NetStateReport {
        let packets_received = self.samples.len();
        let bytes_received: usize = self.samples.iter().map(|s| s.size_bytes).sum();

        let mut ids: Vec<u16> = self.samples.iter().map(|s| s.global_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let loss_seq = run_length_encode_loss(&ids);
        let expected = expected_count(&ids);
        let missing = expected.saturating_sub(ids.len());
        let avg_loss_rate = if expected > 0 { missing as f64 / expected as f64 } else { 0.0 };

        let throughput_kbps = if self.window.as_secs_f64() > 0.0 {
            (bytes_received as f64 * 8.0 / 1000.0) / self.window.as_secs_f64()
        } else {
            0.0
        };

        let recv_samples = std::mem::take(&mut self.since_last_feedback);

        NetStateReport {
            packets_received,
            bytes_received,
            missing_count: missing,
            avg_loss_rate,
            throughput_kbps,
            loss_seq,
            recv_samples,
        }
    }
}

fn expected_count(sorted_unique_ids: &[u16]) -> usize {
    match (sorted_unique_ids.first(), sorted_unique_ids.last()) {
        (Some(&lo), Some(&hi)) => (hi.wrapping_sub(lo) as usize) + 1,
        _ => 0,
    }
}

/// Positive run = consecutive receptions, negative run = consecutive
/// losses, scanning id-order across the window's id span.
fn run_length_encode_loss(sorted_unique_ids: &[u16]) -> Vec<crate::wire::LossRun> {
    if sorted_unique_ids.is_empty() {
        return Vec::new();
    }
    let lo = sorted_unique_ids[0];
    let hi = *sorted_unique_ids.last().unwrap();
    let span = (hi.wrapping_sub(lo) as usize) + 1;
    let present: std::collections::HashSet<u16> = sorted_unique_ids.iter().copied().collect();

    let mut runs = Vec::new();
    let mut cur_present = true;
    let mut cur_len: u16 = 0;
    for i in 0..span {
        let id = lo.wrapping_add(i as u16);
        let is_present = present.contains(&id);
        if i == 0 {
            cur_present = is_present;
            cur_len = 1;
        } else if is_present == cur_present {
            cur_len += 1;
        } else {
            runs.push(crate::wire::LossRun { sign: if cur_present { 1 } else { -1 }, magnitude: cur_len });
            cur_present = is_present;
            cur_len = 1;
        }
    }
    runs.push(crate::wire::LossRun { sign: if cur_present { 1 } else { -1 }, magnitude: cur_len });
    runs
}

#[derive(Debug, Clone)]
pub struct NetStateReport {
    pub packets_received: usize,
    pub bytes_received: usize,
    pub missing_count: usize,
    pub avg_loss_rate: f64,
    pub throughput_kbps: f64,
    pub loss_seq: Vec<crate::wire::LossRun>,
    pub recv_samples: Vec<ReceiveSampleRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn rtt_estimator_converges_toward_samples() {
        let mut est = RttEstimator::new();
        for _ in 0..50 {
            est.on_sample(Duration::from_millis(20));
        }
        let snap = est.snapshot(10.0, 0.0, Duration::ZERO);
        assert!((snap.srtt.as_millis() as i64 - 20).abs() <= 1);
        assert_eq!(snap.min_rtt, Duration::from_millis(20));
    }

    #[test]
    fn loss_run_encoding_all_present() {
        let ids = vec![10, 11, 12, 13];
        let runs = run_length_encode_loss(&ids);
        assert_eq!(runs, vec![crate::wire::LossRun { sign: 1, magnitude: 4 }]);
    }

    #[test]
    fn loss_run_encoding_with_gap() {
        let ids = vec![10, 11, 14, 15];
        let runs = run_length_encode_loss(&ids);
        assert_eq!(
            runs,
            vec![
                crate::wire::LossRun { sign: 1, magnitude: 2 },
                crate::wire::LossRun { sign: -1, magnitude: 2 },
                crate::wire::LossRun { sign: 1, magnitude: 2 },
            ]
        );
    }

    #[test]
    fn window_report_tracks_missing_count() {
        let mut w = ReceiverWindow::new(Duration::from_millis(32));
        let now = Instant::now();
        for id in [0u16, 1, 3] {
            w.on_packet(ReceivedSample { global_id: id, size_bytes: 100, receive_time: now }, 1000);
        }
        let report = w.report();
        assert_eq!(report.packets_received, 3);
        assert_eq!(report.missing_count, 1);
        assert!(report.avg_loss_rate > 0.0);
    }
}
