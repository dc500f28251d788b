use super::FecPolicy;
use crate::netstat::NetStat;

/// Shared comb-walk machinery for [`BolotPolicy`] and [`UsfPolicy`]: an
/// index into a reward/rate table, advanced on a high *residual* loss and
/// backed off on a sustained low raw loss. Grounded in
/// `BolotPolicy::GetPolicyFECParam`/`UsfPolicy::GetPolicyFECParam`
/// (`other-policy.cc`), which differ in their table contents, comb
/// length, the USF-only "drop to comb 0 below 1% raw loss" hard reset,
/// and the USF-only requirement that the raw loss must also have dropped
/// by more than `decrement_diff_gate` since the previous step before the
/// comb backs off.
///
/// `other-policy.cc`'s advance step computes `min(table.len(), last_comb + 1)`
/// against a table indexed `0..table.len()`, which is one past the last
/// valid index whenever `last_comb == table.len() - 1` — a read past the
/// end of the array. That headroom is unreachable in practice (the comb
/// never legitimately needs an entry beyond the last), so here the
/// advance simply clamps to `table.len() - 1`.
struct Comb {
    reward: &'static [u32],
    rate: &'static [u32],
    high_thresh: f64,
    low_thresh: f64,
    decrement_diff_gate: Option<f64>,
    hard_reset_below: Option<f64>,
    index: usize,
    prev_loss: f64,
}

impl Comb {
    fn new(
        reward: &'static [u32],
        rate: &'static [u32],
        high_thresh: f64,
        low_thresh: f64,
        decrement_diff_gate: Option<f64>,
        hard_reset_below: Option<f64>,
    ) -> Self {
        Self { reward, rate, high_thresh, low_thresh, decrement_diff_gate, hard_reset_below, index: 0, prev_loss: 0.0 }
    }

    /// Derives the residual loss `loss / reward[index]` from the
    /// pre-step index, advances the comb when that residual exceeds
    /// `high_thresh`, backs it off by one step when the raw `loss` is
    /// below `low_thresh` (and, if `decrement_diff_gate` is set, only
    /// when `loss` has also fallen by more than that amount since the
    /// last step), applies the hard reset last, then returns the table's
    /// raw `rate[index]` unnormalized.
    fn step(&mut self, loss: f64) -> u32 {
        let residual_loss = loss / self.reward[self.index] as f64;
        let loss_diff = self.prev_loss - loss;

        if residual_loss > self.high_thresh {
            self.index = (self.index + 1).min(self.reward.len() - 1);
        }
        let gate_ok = self.decrement_diff_gate.map_or(true, |min_thresh| loss_diff > min_thresh);
        if loss < self.low_thresh && gate_ok {
            self.index = self.index.saturating_sub(1);
        }
        self.prev_loss = loss;

        if let Some(reset_below) = self.hard_reset_below {
            if loss < reset_below {
                self.index = 0;
            }
        }
        self.rate[self.index]
    }
}

/// Bolot's loss-adaptive FEC scheme: a 10-entry comb over
/// `(reward, redundancy)` pairs, advanced on sustained loss. Grounded in
/// `BolotPolicy::GetPolicyFECParam` (`other-policy.cc`).
pub struct BolotPolicy {
    comb: Comb,
}

const BOLOT_REWARD: [u32; 10] = [1, 4, 4, 8, 8, 8, 8, 18, 18, 18];
const BOLOT_RATE: [u32; 10] = [0, 1, 1, 2, 2, 2, 2, 3, 3, 4];

impl BolotPolicy {
    pub fn new() -> Self {
        Self { comb: Comb::new(&BOLOT_REWARD, &BOLOT_RATE, 0.03, 0.03, None, None) }
    }
}

impl Default for BolotPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FecPolicy for BolotPolicy {
    fn decide_policy(
        &mut self,
        stats: &NetStat,
        _bitrate_kbps: u32,
        _ddl_ms: u16,
        _ddl_left_ms: u16,
        is_rtx: bool,
        _frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        if is_rtx {
            return (max_group_size, 0.0);
        }
        let rate = self.comb.step(stats.cur_loss_rate);
        (max_group_size, rate as f64)
    }

    fn name(&self) -> &'static str {
        "bolot"
    }
}

/// USF variant: a 9-entry comb with slightly different reward/rate
/// tables. Grounded in `UsfPolicy::GetPolicyFECParam` (`other-policy.cc`).
pub struct UsfPolicy {
    comb: Comb,
}

const USF_REWARD: [u32; 9] = [1, 4, 4, 8, 8, 18, 18, 18, 18];
const USF_RATE: [u32; 9] = [0, 1, 1, 2, 2, 3, 3, 3, 4];

impl UsfPolicy {
    pub fn new() -> Self {
        Self { comb: Comb::new(&USF_REWARD, &USF_RATE, 0.03, 0.03, Some(0.03), Some(0.01)) }
    }
}

impl Default for UsfPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FecPolicy for UsfPolicy {
    fn decide_policy(
        &mut self,
        stats: &NetStat,
        _bitrate_kbps: u32,
        _ddl_ms: u16,
        _ddl_left_ms: u16,
        is_rtx: bool,
        _frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        if is_rtx {
            return (max_group_size, 0.0);
        }
        let rate = self.comb.step(stats.cur_loss_rate);
        (max_group_size, rate as f64)
    }

    fn name(&self) -> &'static str {
        "usf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_with_loss(loss: f64) -> NetStat {
        NetStat { cur_loss_rate: loss, ..Default::default() }
    }

    #[test]
    fn bolot_comb_advances_on_sustained_loss() {
        let mut p = BolotPolicy::new();
        let (_, r0) = p.decide_policy(&stats_with_loss(0.1), 0, 0, 0, false, 0, 20, false);
        let (_, r1) = p.decide_policy(&stats_with_loss(0.1), 0, 0, 0, false, 0, 20, false);
        assert!(r1 >= r0);
    }

    #[test]
    fn bolot_comb_resets_on_low_loss() {
        let mut p = BolotPolicy::new();
        for _ in 0..5 {
            p.decide_policy(&stats_with_loss(0.2), 0, 0, 0, false, 0, 20, false);
        }
        let (_, high) = p.decide_policy(&stats_with_loss(0.2), 0, 0, 0, false, 0, 20, false);
        let (_, reset) = p.decide_policy(&stats_with_loss(0.0), 0, 0, 0, false, 0, 20, false);
        assert!(reset <= high);
    }

    #[test]
    fn bolot_is_zero_on_rtx() {
        let mut p = BolotPolicy::new();
        assert_eq!(p.decide_policy(&stats_with_loss(0.5), 0, 0, 0, true, 0, 20, false).1, 0.0);
    }

    #[test]
    fn usf_comb_never_advances_past_last_index() {
        let mut p = UsfPolicy::new();
        // Drive the comb with sustained high loss far past its table length;
        // this must never panic on an out-of-bounds index.
        for _ in 0..100 {
            p.decide_policy(&stats_with_loss(0.9), 0, 0, 0, false, 0, 20, false);
        }
        assert_eq!(p.comb.index, USF_REWARD.len() - 1);
    }
}
