//! Configuration surface: a flat TOML document deserialized with `serde`,
//! validated field-by-field, and turned into the concrete
//! [`Policy`]/[`SenderConfig`]/[`Receiver`] construction inputs the rest
//! of the crate needs. Grounded in `Config::read_from_file`'s
//! read-then-parse shape, generalized from a `Result<Config, ()>` to
//! `Result<Config, ConfigError>` per [`crate::error`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::{
    BolotPolicy, FecPolicy, FixedPolicy, FixedRtxPolicy, HairpinPolicy, HairpinTables,
    HairpinVariant, Policy, RtxOnlyPolicy, TokenRtxPolicy, UsfPolicy, WebRtcAdaptivePolicy,
    WebRtcPolicy, WebRtcStarPolicy,
};
use crate::sender::{RtxPolicyKind, SenderConfig};

/// The recognized `fec_policy` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecPolicyName {
    Hairpin,
    HairpinOne,
    HairpinBound,
    Fixed,
    FixedRtx,
    TokenRtx,
    WebRtc,
    AWebRtc,
    Lin,
    Rtx,
    Bolot,
    Usf,
}

impl FromStr for FecPolicyName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "hairpin" => Self::Hairpin,
            "hairpinone" => Self::HairpinOne,
            "hairpinbound" => Self::HairpinBound,
            "fixed" => Self::Fixed,
            "fixedrtx" => Self::FixedRtx,
            "tokenrtx" => Self::TokenRtx,
            "webrtc" => Self::WebRtc,
            "awebrtc" => Self::AWebRtc,
            "lin" => Self::Lin,
            "rtx" => Self::Rtx,
            "bolot" => Self::Bolot,
            "usf" => Self::Usf,
            other => return Err(ConfigError::UnknownPolicy(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtxPolicyName {
    DupAck,
    Pto,
}

impl FromStr for RtxPolicyName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "dupack" => Self::DupAck,
            "pto" => Self::Pto,
            other => return Err(ConfigError::UnknownPolicy(other.to_string())),
        })
    }
}

impl From<RtxPolicyName> for RtxPolicyKind {
    fn from(name: RtxPolicyName) -> Self {
        match name {
            RtxPolicyName::DupAck => RtxPolicyKind::DupAck,
            RtxPolicyName::Pto => RtxPolicyKind::Pto,
        }
    }
}

/// The attached congestion controller, consumed only at its interface:
/// the core reads a target send rate and a loss signal, never GCC/NADA
/// internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcMode {
    None,
    Gcc,
    Nada,
}

impl FromStr for CcMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => Self::None,
            "gcc" => Self::Gcc,
            "nada" => Self::Nada,
            other => return Err(ConfigError::UnknownPolicy(other.to_string())),
        })
    }
}

/// Raw, deserializable configuration document, plus `hairpin_param_dir`
/// — the original locates its trained tables by a compiled-in relative
/// path; here it's a configurable directory (noted in DESIGN.md) used to
/// load [`HairpinTables`].
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub fec_policy: String,
    pub rtx_policy: String,
    pub delay_ddl_ms: u64,
    pub loss_rate: f64,
    pub link_bw_mbps: f64,
    pub one_way_delay_ms: u64,
    pub fps: u32,
    pub bitrate_mbps: f64,
    pub duration_s: u64,
    pub cc: String,
    pub receiver_window_ms: u64,
    pub max_fec_rate: Option<f64>,
    pub fixed_loss_flag: bool,
    pub qoe_coeff: f64,
    pub star_order: u8,
    pub star_coeff: f64,
    pub fixed_param: f64,
    #[serde(default)]
    pub hairpin_param_dir: Option<PathBuf>,
    #[serde(default = "default_max_data_payload")]
    pub max_data_payload: usize,
    #[serde(default = "default_max_group_size")]
    pub max_group_size: u16,
    #[serde(default = "default_loss_window_ms")]
    pub loss_window_ms: u64,
}

fn default_max_data_payload() -> usize {
    1200
}

fn default_max_group_size() -> u16 {
    crate::policy::MAX_GROUP_SIZE
}

fn default_loss_window_ms() -> u64 {
    1000
}

impl Config {
    pub fn read_from_file<P: AsRef<Path>>(file: P) -> Result<Config, ConfigError> {
        let path = file.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        let config: Config =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        FecPolicyName::from_str(&self.fec_policy)?;
        RtxPolicyName::from_str(&self.rtx_policy)?;
        CcMode::from_str(&self.cc)?;

        if self.delay_ddl_ms == 0 {
            return Err(ConfigError::NotPositive { field: "delay_ddl_ms", value: self.delay_ddl_ms.to_string() });
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(ConfigError::OutOfRange { field: "loss_rate", min: 0.0, max: 1.0, value: self.loss_rate });
        }
        if self.link_bw_mbps <= 0.0 {
            return Err(ConfigError::NotPositive { field: "link_bw_mbps", value: self.link_bw_mbps.to_string() });
        }
        if self.fps == 0 {
            return Err(ConfigError::NotPositive { field: "fps", value: self.fps.to_string() });
        }
        if self.bitrate_mbps <= 0.0 {
            return Err(ConfigError::NotPositive { field: "bitrate_mbps", value: self.bitrate_mbps.to_string() });
        }
        if self.duration_s == 0 {
            return Err(ConfigError::NotPositive { field: "duration_s", value: self.duration_s.to_string() });
        }
        if self.receiver_window_ms == 0 {
            return Err(ConfigError::NotPositive { field: "receiver_window_ms", value: self.receiver_window_ms.to_string() });
        }
        if let Some(max) = self.max_fec_rate {
            if !(0.0..=1.0).contains(&max) {
                return Err(ConfigError::OutOfRange { field: "max_fec_rate", min: 0.0, max: 1.0, value: max });
            }
        }
        if self.qoe_coeff <= 0.0 {
            return Err(ConfigError::NotPositive { field: "qoe_coeff", value: self.qoe_coeff.to_string() });
        }
        if self.star_order > 2 {
            return Err(ConfigError::OutOfRange { field: "star_order", min: 0.0, max: 2.0, value: self.star_order as f64 });
        }
        if self.max_data_payload == 0 {
            return Err(ConfigError::NotPositive { field: "max_data_payload", value: self.max_data_payload.to_string() });
        }
        Ok(())
    }

    /// Builds the concrete [`FecPolicy`] named by `fec_policy`, wrapped in
    /// the shared [`Policy`] guarantees (`max_fec_rate` ceiling, fixed-loss
    /// override).
    pub fn build_policy(&self) -> Result<Policy, ConfigError> {
        let name = FecPolicyName::from_str(&self.fec_policy)?;
        let inner: Box<dyn FecPolicy> = match name {
            FecPolicyName::Fixed => Box::new(FixedPolicy::new(self.fixed_param)),
            FecPolicyName::FixedRtx => Box::new(FixedRtxPolicy::new(self.fixed_param)),
            FecPolicyName::Rtx => Box::new(RtxOnlyPolicy),
            FecPolicyName::TokenRtx => Box::new(TokenRtxPolicy::new()),
            FecPolicyName::Bolot => Box::new(BolotPolicy::new()),
            FecPolicyName::Usf => Box::new(UsfPolicy::new()),
            FecPolicyName::WebRtc => Box::new(WebRtcPolicy::new()),
            FecPolicyName::AWebRtc => Box::new(WebRtcAdaptivePolicy::new()),
            FecPolicyName::Lin => Box::new(WebRtcStarPolicy::new(self.star_order, self.star_coeff)),
            FecPolicyName::Hairpin | FecPolicyName::HairpinOne | FecPolicyName::HairpinBound => {
                let variant = match name {
                    FecPolicyName::Hairpin => HairpinVariant::Hairpin,
                    FecPolicyName::HairpinOne => HairpinVariant::HairpinOne,
                    FecPolicyName::HairpinBound => HairpinVariant::HairpinBound,
                    _ => unreachable!(),
                };
                let param_dir = self.hairpin_param_dir.clone().unwrap_or_else(|| PathBuf::from("./params"));
                let is_cap = self.cc_mode()? != CcMode::None;
                let need_block = variant == HairpinVariant::HairpinBound;
                let tables = HairpinTables::load(&param_dir, true, is_cap, self.qoe_coeff, need_block)?;
                Box::new(HairpinPolicy::new(variant, true, self.qoe_coeff, self.delay_ddl_ms as u16, tables))
            }
        };

        let mut policy = Policy::new(inner);
        if let Some(max) = self.max_fec_rate {
            policy = policy.with_max_fec_rate(max);
        }
        if self.fixed_loss_flag {
            policy = policy.with_fixed_loss(self.loss_rate);
        }
        Ok(policy)
    }

    pub fn rtx_policy_kind(&self) -> Result<RtxPolicyKind, ConfigError> {
        Ok(RtxPolicyName::from_str(&self.rtx_policy)?.into())
    }

    pub fn cc_mode(&self) -> Result<CcMode, ConfigError> {
        CcMode::from_str(&self.cc)
    }

    pub fn delay_ddl(&self) -> Duration {
        Duration::from_millis(self.delay_ddl_ms)
    }

    pub fn one_way_delay(&self) -> Duration {
        Duration::from_millis(self.one_way_delay_ms)
    }

    pub fn receiver_window(&self) -> Duration {
        Duration::from_millis(self.receiver_window_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_s)
    }

    pub fn bitrate_kbps(&self) -> u32 {
        (self.bitrate_mbps * 1000.0).round() as u32
    }

    pub fn sender_config(&self, epoch: Instant) -> Result<SenderConfig, ConfigError> {
        Ok(SenderConfig {
            max_data_payload: self.max_data_payload,
            delay_ddl: self.delay_ddl(),
            fps: self.fps,
            bitrate_kbps: self.bitrate_kbps(),
            max_group_size: self.max_group_size,
            rtx_policy: self.rtx_policy_kind()?,
            loss_window: Duration::from_millis(self.loss_window_ms),
            epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml(fec_policy: &str) -> String {
        format!(
            r#"
fec_policy = "{fec_policy}"
rtx_policy = "dupack"
delay_ddl_ms = 100
loss_rate = 0.05
link_bw_mbps = 30.0
one_way_delay_ms = 10
fps = 60
bitrate_mbps = 10.0
duration_s = 10
cc = "none"
receiver_window_ms = 32
max_fec_rate = 0.5
fixed_loss_flag = false
qoe_coeff = 1.0
star_order = 0
star_coeff = 1.0
fixed_param = 0.05
"#
        )
    }

    #[test]
    fn parses_minimal_fixed_config_and_builds_policy() {
        let config: Config = toml::from_str(&minimal_toml("fixed")).unwrap();
        config.validate().unwrap();
        let mut policy = config.build_policy().unwrap();
        assert_eq!(policy.name(), "fixed");
        let stats = crate::netstat::NetStat::default();
        let (_, rate) = policy.decide(&stats, 10_000, 100, 100, false, 20, 20, false);
        assert_eq!(rate, 0.05);
    }

    #[test]
    fn unknown_fec_policy_name_is_rejected() {
        let config: Config = toml::from_str(&minimal_toml("not_a_policy")).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownPolicy(_))));
    }

    #[test]
    fn zero_delay_ddl_is_rejected() {
        let mut raw = minimal_toml("fixed");
        raw = raw.replace("delay_ddl_ms = 100", "delay_ddl_ms = 0");
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NotPositive { field: "delay_ddl_ms", .. })));
    }

    #[test]
    fn out_of_range_loss_rate_is_rejected() {
        let mut raw = minimal_toml("fixed");
        raw = raw.replace("loss_rate = 0.05", "loss_rate = 1.5");
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "loss_rate", .. })));
    }

    #[test]
    fn rtx_only_policy_name_builds_and_ignores_loss() {
        let config: Config = toml::from_str(&minimal_toml("rtx")).unwrap();
        let mut policy = config.build_policy().unwrap();
        let stats = crate::netstat::NetStat { cur_loss_rate: 0.9, ..Default::default() };
        let (_, rate) = policy.decide(&stats, 10_000, 100, 100, false, 20, 20, false);
        assert_eq!(rate, 0.0);
        assert_eq!(policy.name(), "rtx_only");
    }
}
