use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::FecPolicy;
use crate::netstat::NetStat;

/// Two-tier max-filter over recent loss observations: a 1-second window of
/// raw samples is averaged into the long (10-second) window once per
/// second, and the reported loss is the max over that long window.
/// Grounded verbatim in `WebRtcLossFilter::UpdateAndGetLoss`
/// (`webrtc-policy.cc`); see the comment there for the upstream WebRTC
/// reference this mirrors (`fec_controller_default.cc`).
pub struct WebRtcLossFilter {
    short: VecDeque<(f64, Instant)>,
    long: VecDeque<(f64, Instant)>,
    long_window: Duration,
    short_window: Duration,
}

impl Default for WebRtcLossFilter {
    fn default() -> Self {
        Self {
            short: VecDeque::new(),
            long: VecDeque::new(),
            long_window: Duration::from_secs(10),
            short_window: Duration::from_secs(1),
        }
    }
}

impl WebRtcLossFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_and_get_loss(&mut self, loss: f64, now: Instant) -> f64 {
        while let Some(&(_, t)) = self.short.front() {
            if now.saturating_duration_since(t) > self.short_window && t <= now {
                self.short.pop_front();
            } else {
                break;
            }
        }
        self.short.push_back((loss, now));

        while let Some(&(_, t)) = self.long.front() {
            if t + self.long_window < now {
                self.long.pop_front();
            } else {
                break;
            }
        }
        let should_fold = match self.long.back() {
            None => true,
            Some(&(_, t)) => t + self.short_window < now,
        };
        if should_fold {
            let avg = self.short.iter().map(|(l, _)| l).sum::<f64>() / self.short.len() as f64;
            self.long.push_back((avg, now));
            self.short.clear();
        }

        self.long.iter().map(|(l, _)| *l).fold(0.0, f64::max)
    }
}

/// Closed-form stand-in for the table-driven `get_fec_rate_webrtc` lookup
/// (`webrtc-fec-array.h`'s generated table is a large binary-derived blob,
/// not reproduced here). Monotone increasing in `loss`, saturating at high
/// loss, and decreasing with larger `group_size`/`bitrate_mbps` (more
/// packets or bandwidth to amortize redundancy over).
///
/// `loss` in `[0.0000, 0.5000]`, `group_size` in `[5, 55]` data packets,
/// `bitrate_mbps` in `[2.00, 30.00]` — ranges per the doc comment on
/// `get_fec_rate_webrtc_rtt`.
pub fn webrtc_fec_rate(loss: f64, group_size: u16, bitrate_mbps: f64) -> f64 {
    let loss = loss.clamp(0.0, 0.5);
    let group_size = group_size.clamp(5, 55) as f64;
    let bitrate_mbps = bitrate_mbps.clamp(2.0, 30.0);

    let redundancy_curve = 1.0 - (1.0 - loss).powf(group_size / 10.0);
    let bandwidth_headroom = 1.0 / (1.0 + bitrate_mbps / 10.0);
    (redundancy_curve * (1.0 + bandwidth_headroom)).clamp(0.0, 1.0)
}

/// Sigmoid table adjusting the FEC rate down at low RTT: ranges from 0 to
/// 100 over 0..99 ms, values in percent. Reproduced verbatim from
/// `adjust_rtt_array_webrtc` (`webrtc-adjust-array.h`).
pub const ADJUST_RTT_ARRAY: [u8; 100] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 3, 3, 4, 5, 6, 7, 9, 10, 12, 15, 18,
    21, 24, 28, 32, 37, 41, 46, 51, 56, 61, 66, 70, 74, 78, 81, 84, 86, 89, 90, 92, 93, 95, 95, 96,
    97, 97, 98, 98, 99, 99, 99, 99, 99, 99, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100,
    100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100,
    100, 100, 100, 100,
];

/// Base WebRTC-style policy: table lookup over `(filtered_loss,
/// group_size.min(48), bitrate_Mbps)`, clamped to `[0,1]`.
pub struct WebRtcPolicy {
    filter: WebRtcLossFilter,
    now: Box<dyn Fn() -> Instant + Send>,
}

impl WebRtcPolicy {
    pub fn new() -> Self {
        Self { filter: WebRtcLossFilter::new(), now: Box::new(Instant::now) }
    }

    /// Construct with an injectable clock, for deterministic tests of the
    /// loss filter's windowing.
    pub fn with_clock(now: Box<dyn Fn() -> Instant + Send>) -> Self {
        Self { filter: WebRtcLossFilter::new(), now }
    }
}

impl Default for WebRtcPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FecPolicy for WebRtcPolicy {
    fn decide_policy(
        &mut self,
        stats: &NetStat,
        bitrate_kbps: u32,
        _ddl_ms: u16,
        _ddl_left_ms: u16,
        is_rtx: bool,
        _frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        let group_size = max_group_size.min(48);
        let mut fec_rate = 0.0;
        if !is_rtx {
            let filtered = self.filter.update_and_get_loss(stats.cur_loss_rate, (self.now)());
            fec_rate = webrtc_fec_rate(filtered, group_size, bitrate_kbps as f64 / 1000.0);
        }
        (group_size, fec_rate.min(1.0))
    }

    fn name(&self) -> &'static str {
        "webrtc"
    }
}

/// WebRTC rate, additionally scaled by [`ADJUST_RTT_ARRAY`] indexed by the
/// clamped smoothed RTT in milliseconds.
pub struct WebRtcAdaptivePolicy {
    filter: WebRtcLossFilter,
    now: Box<dyn Fn() -> Instant + Send>,
}

impl WebRtcAdaptivePolicy {
    pub fn new() -> Self {
        Self { filter: WebRtcLossFilter::new(), now: Box::new(Instant::now) }
    }

    pub fn with_clock(now: Box<dyn Fn() -> Instant + Send>) -> Self {
        Self { filter: WebRtcLossFilter::new(), now }
    }
}

impl Default for WebRtcAdaptivePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FecPolicy for WebRtcAdaptivePolicy {
    fn decide_policy(
        &mut self,
        stats: &NetStat,
        bitrate_kbps: u32,
        _ddl_ms: u16,
        _ddl_left_ms: u16,
        is_rtx: bool,
        _frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        let group_size = max_group_size.min(48);
        let mut fec_rate = 0.0;
        if !is_rtx {
            let filtered = self.filter.update_and_get_loss(stats.cur_loss_rate, (self.now)());
            let base = webrtc_fec_rate(filtered, group_size, bitrate_kbps as f64 / 1000.0);
            let rtt_index = (stats.srtt.as_millis() as usize).min(ADJUST_RTT_ARRAY.len() - 1);
            fec_rate = base * (ADJUST_RTT_ARRAY[rtt_index] as f64 / 100.0);
        }
        (group_size, fec_rate.min(1.0))
    }

    fn name(&self) -> &'static str {
        "webrtc_adaptive"
    }
}

/// Deadline-aware multiplier on top of the base WebRTC rate. `order`
/// selects one of three shapes (sqrt/linear/quadratic); grounded in
/// `WebRTCStarPolicy::{SqrtFECRate,LinearFECRate,QuadraticFECRate}`.
pub struct WebRtcStarPolicy {
    order: u8,
    coeff: f64,
    filter: WebRtcLossFilter,
    now: Box<dyn Fn() -> Instant + Send>,
}

impl WebRtcStarPolicy {
    pub fn new(order: u8, coeff: f64) -> Self {
        Self { order, coeff, filter: WebRtcLossFilter::new(), now: Box::new(Instant::now) }
    }

    pub fn with_clock(order: u8, coeff: f64, now: Box<dyn Fn() -> Instant + Send>) -> Self {
        Self { order, coeff, filter: WebRtcLossFilter::new(), now }
    }
}

impl FecPolicy for WebRtcStarPolicy {
    fn decide_policy(
        &mut self,
        stats: &NetStat,
        bitrate_kbps: u32,
        _ddl_ms: u16,
        ddl_left_ms: u16,
        _is_rtx: bool,
        _frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        let group_size = max_group_size.min(48);
        let filtered = self.filter.update_and_get_loss(stats.cur_loss_rate, (self.now)());
        let mut fec_rate = webrtc_fec_rate(filtered, group_size, bitrate_kbps as f64 / 1000.0).min(1.0);

        let rtt_ms = stats.cur_rtt.as_millis().max(0) as f64;
        let ddl_left = (ddl_left_ms as f64).max(1.0);
        let rtt_to_ddl_left = rtt_ms / ddl_left;
        fec_rate = match self.order {
            0 => fec_rate * (2.0 * rtt_to_ddl_left).sqrt(),
            1 => (self.coeff * fec_rate * rtt_to_ddl_left).min(1.0),
            2 => 4.0 * fec_rate * rtt_to_ddl_left * rtt_to_ddl_left,
            _ => {
                tracing::error!("WebRTCStar order {} unsupported, falling back to base rate", self.order);
                fec_rate
            }
        };
        (group_size, fec_rate)
    }

    fn name(&self) -> &'static str {
        "webrtc_star"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn base_fec_rate_is_monotone_in_loss() {
        let mut prev = 0.0;
        let mut loss = 0.0;
        while loss <= 0.5 {
            let rate = webrtc_fec_rate(loss, 20, 10.0);
            assert!(rate + 1e-9 >= prev, "loss={loss} rate={rate} prev={prev}");
            prev = rate;
            loss += 0.01;
        }
    }

    #[test]
    fn loss_filter_short_window_averages_then_maxes() {
        let mut filter = WebRtcLossFilter::new();
        let t0 = Instant::now();
        assert_eq!(filter.update_and_get_loss(0.1, t0), 0.1);
        // Still inside the 1s short window: folds into the long window on
        // the next call once short_window elapses relative to long.back().
        let observed = filter.update_and_get_loss(0.3, t0 + Duration::from_millis(500));
        assert!(observed >= 0.1);
    }

    #[test]
    fn adaptive_zero_at_zero_rtt_and_saturates_at_high_rtt() {
        // Exercise the sigmoid table directly: the documented contract is
        // table[0] == 0 and the table saturates to 100 well before index 99.
        assert_eq!(ADJUST_RTT_ARRAY[0], 0);
        assert_eq!(ADJUST_RTT_ARRAY[99], 100);
        assert!(ADJUST_RTT_ARRAY[70..].iter().all(|&v| v == 100));
    }

    #[test]
    fn star_sqrt_order_matches_closed_form() {
        let clock = Arc::new(Mutex::new(Instant::now()));
        let clock_clone = clock.clone();
        let mut policy = WebRtcStarPolicy::with_clock(0, 1.0, Box::new(move || *clock_clone.lock().unwrap()));
        let stats = NetStat { cur_loss_rate: 0.1, cur_rtt: Duration::from_millis(30), ..Default::default() };
        let (_, rate) = policy.decide_policy(&stats, 10_000, 100, 70, false, 20, 20, false);
        let base = webrtc_fec_rate(0.1, 20, 10.0).min(1.0);
        let expected = base * (2.0 * 30.0 / 70.0_f64).sqrt();
        assert!((rate - expected).abs() < 1e-9);
    }
}
