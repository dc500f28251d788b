use rand::Rng;

use super::FecPolicy;
use crate::netstat::NetStat;

/// `TokenRtx`: each new initial transmission flips a fair coin. Heads
/// ("add rtx") spends a token budget of `frame_size * loss_rate` entirely
/// on retransmission-time FEC (rate `1.0` per batch until the budget is
/// exhausted, partial on the last batch); tails applies `loss_rate`
/// directly on the initial transmission. Grounded in `TokenRtxPolicy`
/// (`other-policy.cc`); the `std::rand() % 2` coin flip becomes
/// `rand::Rng::gen_bool`.
pub struct TokenRtxPolicy {
    rng: Box<dyn RngLike>,
    token: f64,
    add_rtx: bool,
}

/// Abstraction over the coin flip so tests can pin the outcome without
/// reaching into `rand`'s internals.
pub trait RngLike: Send {
    fn gen_bool_half(&mut self) -> bool;
}

struct ThreadRngLike;
impl RngLike for ThreadRngLike {
    fn gen_bool_half(&mut self) -> bool {
        rand::thread_rng().gen_bool(0.5)
    }
}

impl TokenRtxPolicy {
    pub fn new() -> Self {
        Self { rng: Box::new(ThreadRngLike), token: 0.0, add_rtx: false }
    }

    /// Construct with a deterministic coin source, for tests.
    pub fn with_rng(rng: Box<dyn RngLike>) -> Self {
        Self { rng, token: 0.0, add_rtx: false }
    }
}

impl Default for TokenRtxPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FecPolicy for TokenRtxPolicy {
    fn decide_policy(
        &mut self,
        stats: &NetStat,
        _bitrate_kbps: u32,
        _ddl_ms: u16,
        _ddl_left_ms: u16,
        is_rtx: bool,
        frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        if !is_rtx {
            self.token = frame_size as f64 * stats.cur_loss_rate;
            self.add_rtx = self.rng.gen_bool_half();
        }

        if !is_rtx {
            if self.add_rtx {
                (max_group_size, 0.0)
            } else {
                (max_group_size, stats.cur_loss_rate)
            }
        } else if !self.add_rtx {
            (max_group_size, 0.0)
        } else if self.token >= max_group_size as f64 {
            self.token -= max_group_size as f64;
            (max_group_size, 1.0)
        } else {
            let fec_rate = self.token.max(0.0) / max_group_size as f64;
            self.token = 0.0;
            (max_group_size, fec_rate)
        }
    }

    fn name(&self) -> &'static str {
        "token_rtx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCoin(bool);
    impl RngLike for FixedCoin {
        fn gen_bool_half(&mut self) -> bool {
            self.0
        }
    }

    #[test]
    fn tails_applies_loss_rate_on_initial() {
        let mut p = TokenRtxPolicy::with_rng(Box::new(FixedCoin(false)));
        let stats = NetStat { cur_loss_rate: 0.1, ..Default::default() };
        let (_, rate) = p.decide_policy(&stats, 0, 0, 0, false, 10, 50, false);
        assert_eq!(rate, 0.1);
    }

    #[test]
    fn heads_spends_token_budget_on_rtx_until_exhausted() {
        let mut p = TokenRtxPolicy::with_rng(Box::new(FixedCoin(true)));
        let stats = NetStat { cur_loss_rate: 1.0, ..Default::default() };
        // token = frame_size(10) * loss(1.0) = 10, well under max_group_size.
        let (_, initial_rate) = p.decide_policy(&stats, 0, 0, 0, false, 10, 50, false);
        assert_eq!(initial_rate, 0.0);
        let (_, rtx_rate) = p.decide_policy(&stats, 0, 0, 0, true, 10, 50, false);
        assert_eq!(rtx_rate, 10.0 / 50.0);
        // Token exhausted: a second rtx round in the same cycle gets nothing.
        let (_, rtx_rate2) = p.decide_policy(&stats, 0, 0, 0, true, 10, 50, false);
        assert_eq!(rtx_rate2, 0.0);
    }
}
