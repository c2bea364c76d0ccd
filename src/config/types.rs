use std::path::PathBuf;

use serde::Deserialize;
use solana_commitment_config::{CommitmentConfig, CommitmentLevel};

use super::loader::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TandemConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub custody: CustodyConfig,
    #[serde(default)]
    pub assembler: AssemblerConfig,
    #[serde(default)]
    pub jupiter: JupiterConfig,
    #[serde(default)]
    pub positions: PositionsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    #[serde(
        default,
        rename = "rpc_url",
        alias = "rpc_urls",
        deserialize_with = "super::deserialize_rpc_urls"
    )]
    pub rpc_urls: Vec<String>,
    #[serde(default = "super::default_commitment")]
    pub commitment: String,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GlobalConfig {
    pub fn primary_rpc_url(&self) -> Option<&str> {
        self.rpc_urls.first().map(|s| s.as_str())
    }

    pub fn commitment(&self) -> Result<CommitmentConfig, ConfigError> {
        parse_commitment("global.commitment", &self.commitment)
            .map(|commitment| CommitmentConfig { commitment })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "super::default_logging_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default = "super::default_timezone_offset_hours")]
    pub timezone_offset_hours: i8,
}

/// `[custody]`：托管签名服务（Privy 兼容接口）。
#[derive(Debug, Clone, Deserialize)]
pub struct CustodyConfig {
    #[serde(default = "super::default_custody_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default = "super::default_custody_app_id_header")]
    pub app_id_header: String,
    #[serde(default = "super::default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssemblerConfig {
    #[serde(default)]
    pub skip_preflight: bool,
    #[serde(default = "super::default_commitment")]
    pub preflight_commitment: String,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default = "super::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "super::default_http_timeout_ms")]
    pub sign_timeout_ms: u64,
    #[serde(default = "super::default_http_timeout_ms")]
    pub submit_timeout_ms: u64,
    #[serde(default = "super::default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    /// 本地构建的转账交易附加的优先费；为空时不插入 ComputeBudget 指令。
    #[serde(default)]
    pub compute_unit_price_micro_lamports: Option<u64>,
}

impl AssemblerConfig {
    pub fn preflight_commitment(&self) -> Result<CommitmentLevel, ConfigError> {
        parse_commitment("assembler.preflight_commitment", &self.preflight_commitment)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JupiterConfig {
    #[serde(default = "super::default_jupiter_base_url")]
    pub base_url: String,
    #[serde(default = "super::default_read_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "super::default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// `[positions]`：DEX SDK 旁路服务，返回仓位相关交易模板。
#[derive(Debug, Clone, Deserialize)]
pub struct PositionsConfig {
    #[serde(default = "super::default_positions_base_url")]
    pub base_url: String,
    #[serde(default = "super::default_http_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "super::default_pool_cache_ttl_secs")]
    pub pool_cache_ttl_secs: u64,
    #[serde(default = "super::default_range_bins")]
    pub default_range_bins: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "super::default_registry_path")]
    pub path: String,
}

impl RegistryConfig {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "super::default_prometheus_listen")]
    pub listen: String,
}

fn parse_commitment(field: &'static str, raw: &str) -> Result<CommitmentLevel, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "processed" => Ok(CommitmentLevel::Processed),
        "confirmed" => Ok(CommitmentLevel::Confirmed),
        "finalized" => Ok(CommitmentLevel::Finalized),
        other => Err(ConfigError::Invalid {
            field,
            message: format!("未知的 commitment: {other}"),
        }),
    }
}
