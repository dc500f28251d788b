//! FEC/RTX policy abstraction: one trait, several peer implementations.
//! Mirrors `FECPolicy`/`GetFECParam`: a thin non-virtual wrapper (here,
//! [`Policy::decide`]) that applies the shared `max_fec_rate` ceiling and
//! `fixed_loss` override uniformly, delegating the actual decision to a
//! per-variant [`FecPolicy`] implementation.
//!
//! Concrete variants are peers behind the trait: no inheritance chain,
//! each owns whatever state it needs (token counters, comb index,
//! loss-filter windows).

mod bolot;
mod fixed;
mod hairpin;
mod token;
mod webrtc;

pub use bolot::{BolotPolicy, UsfPolicy};
pub use fixed::{FixedPolicy, FixedRtxPolicy, RtxOnlyPolicy};
pub use hairpin::{HairpinPolicy, HairpinTables, HairpinVariant, BETA_ARRAY_SIZE, BLOCK_ARRAY_SIZE};
pub use token::TokenRtxPolicy;
pub use webrtc::{webrtc_fec_rate, WebRtcLossFilter, WebRtcPolicy, WebRtcAdaptivePolicy, WebRtcStarPolicy};

use crate::netstat::NetStat;

/// The one-method contract every FEC/RTX policy implements. Pure with
/// respect to its inputs except where documented (token counters, comb
/// index, max-filter windows).
pub trait FecPolicy: Send {
    #[allow(clippy::too_many_arguments)]
    fn decide_policy(
        &mut self,
        stats: &NetStat,
        bitrate_kbps: u32,
        ddl_ms: u16,
        ddl_left_ms: u16,
        is_rtx: bool,
        frame_size: u8,
        max_group_size: u16,
        fix_group_size: bool,
    ) -> (u16, f64);

    fn name(&self) -> &'static str;
}

/// Wraps a concrete [`FecPolicy`] with shared guarantees: `fec_rate >= 0`,
/// optional `max_fec_rate` ceiling, and an optional fixed-loss override
/// that replaces `stats.cur_loss_rate` before the inner policy ever sees
/// it.
pub struct Policy {
    inner: Box<dyn FecPolicy>,
    max_fec_rate: Option<f64>,
    fixed_loss: Option<f64>,
}

impl Policy {
    pub fn new(inner: Box<dyn FecPolicy>) -> Self {
        Self { inner, max_fec_rate: None, fixed_loss: None }
    }

    pub fn with_max_fec_rate(mut self, max_fec_rate: f64) -> Self {
        self.max_fec_rate = Some(max_fec_rate);
        self
    }

    pub fn with_fixed_loss(mut self, fixed_loss: f64) -> Self {
        self.fixed_loss = Some(fixed_loss);
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn decide(
        &mut self,
        stats: &NetStat,
        bitrate_kbps: u32,
        ddl_ms: u16,
        ddl_left_ms: u16,
        is_rtx: bool,
        frame_size: u8,
        max_group_size: u16,
        fix_group_size: bool,
    ) -> (u16, f64) {
        let mut effective_stats = *stats;
        if let Some(fixed) = self.fixed_loss {
            effective_stats.cur_loss_rate = fixed;
        }
        let (group_size, mut fec_rate) = self.inner.decide_policy(
            &effective_stats,
            bitrate_kbps,
            ddl_ms,
            ddl_left_ms,
            is_rtx,
            frame_size,
            max_group_size,
            fix_group_size,
        );
        fec_rate = fec_rate.max(0.0);
        if let Some(max) = self.max_fec_rate {
            fec_rate = fec_rate.min(max);
        }
        (group_size, fec_rate)
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }
}

pub const MAX_GROUP_SIZE: u16 = 100;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stats_with_loss(loss: f64) -> NetStat {
        NetStat { cur_loss_rate: loss, srtt: Duration::from_millis(30), cur_rtt: Duration::from_millis(30), ..Default::default() }
    }

    #[test]
    fn fixed_loss_override_replaces_estimator_reading() {
        let mut policy = Policy::new(Box::new(FixedPolicy::new(0.1))).with_fixed_loss(0.2);
        // FixedPolicy ignores loss entirely, but exercise the override path
        // via a policy that *does* look at it to prove it actually swaps in.
        let mut observing = Policy::new(Box::new(fixed::test_support::EchoLossPolicy)).with_fixed_loss(0.2);
        let (_, rate) = observing.decide(&stats_with_loss(0.9), 5000, 100, 100, false, 10, 20, false);
        assert_eq!(rate, 0.2);
        // Sanity: the wrapped policy itself is unaffected by unrelated state.
        let _ = policy.decide(&stats_with_loss(0.0), 5000, 100, 100, false, 10, 20, false);
    }

    #[test]
    fn max_fec_rate_ceiling_clamps() {
        let mut policy = Policy::new(Box::new(fixed::test_support::EchoLossPolicy)).with_max_fec_rate(0.3);
        let (_, rate) = policy.decide(&stats_with_loss(0.9), 5000, 100, 100, false, 10, 20, false);
        assert_eq!(rate, 0.3);
    }
}
