use super::FecPolicy;
use crate::netstat::NetStat;

/// `Fixed(p)`: rate `p` on the initial transmission, `0` on retransmission.
/// Grounded in `FixedPolicy::GetPolicyFECParam` (`other-policy.cc`).
pub struct FixedPolicy {
    rate: f64,
}

impl FixedPolicy {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

impl FecPolicy for FixedPolicy {
    fn decide_policy(
        &mut self,
        _stats: &NetStat,
        _bitrate_kbps: u32,
        _ddl_ms: u16,
        _ddl_left_ms: u16,
        is_rtx: bool,
        _frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        if is_rtx {
            (max_group_size, 0.0)
        } else {
            (max_group_size, self.rate)
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// `FixedRtx(p)`: mirror image of `Fixed` — rate `p` only on retransmission.
pub struct FixedRtxPolicy {
    rate: f64,
}

impl FixedRtxPolicy {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

impl FecPolicy for FixedRtxPolicy {
    fn decide_policy(
        &mut self,
        _stats: &NetStat,
        _bitrate_kbps: u32,
        _ddl_ms: u16,
        _ddl_left_ms: u16,
        is_rtx: bool,
        _frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        if is_rtx {
            (max_group_size, self.rate)
        } else {
            (max_group_size, 0.0)
        }
    }

    fn name(&self) -> &'static str {
        "fixed_rtx"
    }
}

/// `RtxOnly`: FEC is disabled entirely; loss recovery is driven solely by
/// the sender's dup-ack/PTO loss detector. Grounded in `RtxOnlyPolicy`,
/// which specializes `FixedPolicy(0)` with no override.
pub struct RtxOnlyPolicy;

impl FecPolicy for RtxOnlyPolicy {
    fn decide_policy(
        &mut self,
        _stats: &NetStat,
        _bitrate_kbps: u32,
        _ddl_ms: u16,
        _ddl_left_ms: u16,
        _is_rtx: bool,
        _frame_size: u8,
        max_group_size: u16,
        _fix_group_size: bool,
    ) -> (u16, f64) {
        (max_group_size, 0.0)
    }

    fn name(&self) -> &'static str {
        "rtx_only"
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Test-only policy that reports `stats.cur_loss_rate` verbatim, used
    /// to prove the `Policy` wrapper's fixed-loss/max-rate plumbing
    /// actually reaches the inner implementation.
    pub struct EchoLossPolicy;

    impl FecPolicy for EchoLossPolicy {
        fn decide_policy(
            &mut self,
            stats: &NetStat,
            _bitrate_kbps: u32,
            _ddl_ms: u16,
            _ddl_left_ms: u16,
            _is_rtx: bool,
            _frame_size: u8,
            max_group_size: u16,
            _fix_group_size: bool,
        ) -> (u16, f64) {
            (max_group_size, stats.cur_loss_rate)
        }

        fn name(&self) -> &'static str {
            "echo_loss"
        }
    }
}
