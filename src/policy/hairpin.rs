use std::fs;
use std::path::{Path, PathBuf};

use super::FecPolicy;
use crate::error::ConfigError;
use crate::netstat::NetStat;

/// Flattened size of the FEC-count table, in bytes (one `u8` per
/// `(loss, frame_size, layer, packet)` cell).
pub const BETA_ARRAY_SIZE: usize = 462_825;
/// Flattened size of the block-size table, in bytes.
pub const BLOCK_ARRAY_SIZE: usize = 7_209_972;

/// Which deadline-aware FEC+block-size variant a [`HairpinPolicy`]
/// implements, matching the `hairpin`/`hairpinone`/`hairpinbound`
/// configuration names. Grounded in the `k_delayDdl == 0`
/// branch and `m_isBlockSizeOpt` flag of `HairpinPolicy` (`hairpin-policy.cc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HairpinVariant {
    /// Full layered lookahead.
    Hairpin,
    /// `delay_ddl == 0` forces `layer_index = 0`, collapsing the layer
    /// dimension of the FEC-count table.
    HairpinOne,
    /// Enables the block-size table lookup in addition to the FEC-count
    /// table.
    HairpinBound,
}

/// Pre-loaded beta (FEC-count) and optional block-size quantization
/// tables, read from the binary blobs the offline trainer produces.
/// Grounded in the `ifstream` loads in `HairpinPolicy`'s constructor
/// (`hairpin-policy.cc`), which fail fast (`NS_FATAL_ERROR`) when the
/// file is missing — reproduced here as [`ConfigError::HairpinTable`].
pub struct HairpinTables {
    beta: Vec<u8>,
    block: Option<Vec<u8>>,
}

impl HairpinTables {
    /// Loads `beta-array-rtx{0,1}-cap{0,1}-coeff{qoe_coeff:.0e}.bin` (and,
    /// when `need_block` is set, the matching `block-*.bin`) from
    /// `param_dir`.
    pub fn load(param_dir: &Path, is_rtx: bool, is_cap: bool, qoe_coeff: f64, need_block: bool) -> Result<Self, ConfigError> {
        let data_conf = format!(
            "array-rtx{}-cap{}-coeff{:.0e}",
            is_rtx as u8, is_cap as u8, qoe_coeff
        );

        let beta_path: PathBuf = param_dir.join(format!("beta-{data_conf}.bin"));
        let beta = fs::read(&beta_path).map_err(|source| ConfigError::HairpinTable { path: beta_path, source })?;
        if beta.len() != BETA_ARRAY_SIZE {
            return Err(ConfigError::HairpinTableSize { path: beta_path, expected: BETA_ARRAY_SIZE, actual: beta.len() });
        }

        let block = if need_block {
            let block_path: PathBuf = param_dir.join(format!("block-{data_conf}.bin"));
            let bytes = fs::read(&block_path).map_err(|source| ConfigError::HairpinTable { path: block_path, source })?;
            if bytes.len() != BLOCK_ARRAY_SIZE {
                return Err(ConfigError::HairpinTableSize { path: block_path, expected: BLOCK_ARRAY_SIZE, actual: bytes.len() });
            }
            Some(bytes)
        } else {
            None
        };

        Ok(Self { beta, block })
    }

    /// Builds synthetic tables in the same shape as [`Self::load`], for
    /// tests that exercise the index arithmetic without shipping the
    /// multi-hundred-megabyte trained blobs. `f` computes the byte stored
    /// at each flattened index.
    #[cfg(test)]
    fn synthetic(need_block: bool, beta_fill: impl Fn(usize) -> u8, block_fill: impl Fn(usize) -> u8) -> Self {
        let beta = (0..BETA_ARRAY_SIZE).map(beta_fill).collect();
        let block = need_block.then(|| (0..BLOCK_ARRAY_SIZE).map(block_fill).collect());
        Self { beta, block }
    }
}

fn quantize_round(value: f64, start: f64, interval: f64) -> u8 {
    ((value - start) / interval).round() as u8
}

fn quantize_ceil(value: f64, start: f64, interval: f64) -> u8 {
    ((value - start) / interval).ceil() as u8
}

/// Deadline-aware FEC policy driven by offline-trained quantization
/// tables over `(loss, frame_size, layer, packet)` for the FEC count and
/// `(loss, frame_size, ddl, rtt, dispersion)` for the block size.
/// Grounded in `HairpinPolicy::GetPolicyFECParam` (`hairpin-policy.cc`).
pub struct HairpinPolicy {
    variant: HairpinVariant,
    is_rtx_designated: bool,
    qoe_coeff: f64,
    delay_ddl: u16,
    tables: HairpinTables,
}

impl HairpinPolicy {
    pub fn new(variant: HairpinVariant, is_rtx_designated: bool, qoe_coeff: f64, delay_ddl: u16, tables: HairpinTables) -> Self {
        Self { variant, is_rtx_designated, qoe_coeff, delay_ddl, tables }
    }

    fn fec_count(&self, loss: f64, frame_size: u8, remaining_time_ms: u16, rtt_ms: u16, packet: u8) -> u8 {
        let loss = loss.clamp(0.0, 0.5);
        let loss_index = quantize_round(loss, 0.0, 0.01) as usize;

        let frame_size = frame_size.clamp(5, 55);
        let frame_size_index = quantize_ceil(frame_size as f64 - 5.0, 0.0, 5.0) as usize;

        let rtt = rtt_ms.max(1);
        let layer = (remaining_time_ms / rtt).clamp(1, 15);
        let mut layer_index = quantize_round(layer as f64 - 1.0, 0.0, 1.0) as usize;
        if self.delay_ddl == 0 || self.variant == HairpinVariant::HairpinOne {
            layer_index = 0;
        }

        let packet = packet.clamp(1, 55);
        let packet_index = quantize_round(packet as f64 - 1.0, 0.0, 1.0) as usize;

        let index = loss_index * 9075 + frame_size_index * 825 + layer_index * 55 + packet_index;
        self.tables.beta[index]
    }

    fn block_size(&self, loss: f64, frame_size: u8, ddl_ms: u16, rtt_ms: u16, rdisp: f64) -> u8 {
        let loss = loss.clamp(0.0, 0.5);
        let loss_index = quantize_round(loss, 0.0, 0.01) as usize;

        let frame_size = frame_size.clamp(5, 55);
        let frame_size_index = quantize_ceil(frame_size as f64 - 5.0, 0.0, 5.0) as usize;

        let ddl = ddl_ms.clamp(20, 140);
        let ddl_index = quantize_round(ddl as f64 - 20.0, 0.0, 20.0) as usize;

        let rtt = rtt_ms.clamp(10, 80);
        let rtt_index = quantize_round(rtt as f64 - 10.0, 0.0, 2.0) as usize;

        let rdisp = rdisp.clamp(0.0, 1.0);
        let rdisp_index = quantize_round(rdisp, 0.0, 0.02) as usize;

        let index = loss_index * 141_372 + frame_size_index * 12_852 + ddl_index * 1836 + rtt_index * 51 + rdisp_index;
        self.tables.block.as_ref().expect("block table required by this variant")[index]
    }
}

impl FecPolicy for HairpinPolicy {
    fn decide_policy(
        &mut self,
        stats: &NetStat,
        _bitrate_kbps: u32,
        _ddl_ms: u16,
        ddl_left_ms: u16,
        is_rtx: bool,
        frame_size: u8,
        max_group_size: u16,
        fix_group_size: bool,
    ) -> (u16, f64) {
        let mut fec_count: u8 = 0;
        let mut block_size: u16 = max_group_size;

        if self.is_rtx_designated || !is_rtx {
            let rtt_ms = (stats.srtt + stats.rtt_sd).as_millis().max(0);
            let rtt_ms = (rtt_ms as f64).ceil() as u16;
            let ddl_left = ddl_left_ms.saturating_sub(rtt_ms);

            if self.variant == HairpinVariant::HairpinBound && !fix_group_size && frame_size as u16 == max_group_size {
                let rdisp_ms = stats.one_way_dispersion.as_micros() as f64 / 1e3;
                block_size = self.block_size(stats.cur_loss_rate, frame_size, _ddl_ms, rtt_ms, rdisp_ms) as u16;
            }

            fec_count = self.fec_count(stats.cur_loss_rate, frame_size, ddl_left, rtt_ms, block_size.min(255) as u8);
        }

        let fec_rate = fec_count as f64 / block_size.max(1) as f64;
        (block_size, fec_rate)
    }

    fn name(&self) -> &'static str {
        match self.variant {
            HairpinVariant::Hairpin => "hairpin",
            HairpinVariant::HairpinOne => "hairpin_one",
            HairpinVariant::HairpinBound => "hairpin_bound",
        }
    }
}
