use std::collections::HashSet;

use serde::Deserialize;
use serde::de::Deserializer;

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

use self::types as cfg;

pub(crate) fn default_logging_level() -> String {
    "info".to_string()
}

pub(crate) fn default_timezone_offset_hours() -> i8 {
    0
}

pub(crate) fn default_commitment() -> String {
    "confirmed".to_string()
}

pub(crate) fn default_custody_base_url() -> String {
    "https://api.privy.io".to_string()
}

pub(crate) fn default_custody_app_id_header() -> String {
    "privy-app-id".to_string()
}

pub(crate) fn default_http_timeout_ms() -> u64 {
    15_000
}

pub(crate) fn default_read_timeout_ms() -> u64 {
    10_000
}

pub(crate) fn default_confirm_timeout_ms() -> u64 {
    60_000
}

pub(crate) fn default_jupiter_base_url() -> String {
    "https://lite-api.jup.ag/swap/v1".to_string()
}

pub(crate) fn default_slippage_bps() -> u16 {
    50
}

pub(crate) fn default_positions_base_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

pub(crate) fn default_pool_cache_ttl_secs() -> u64 {
    30
}

pub(crate) fn default_range_bins() -> u32 {
    34
}

pub(crate) fn default_registry_path() -> String {
    "data/wallets.json".to_string()
}

pub(crate) fn default_prometheus_listen() -> String {
    "0.0.0.0:9898".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RpcUrlField {
    Single(String),
    Multiple(Vec<String>),
}

/// `rpc_url` 既可写成字符串也可写成数组；去重并忽略空白项。
pub(crate) fn deserialize_rpc_urls<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let helper = Option::<RpcUrlField>::deserialize(deserializer)?;
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    let values = match helper {
        Some(RpcUrlField::Single(url)) => vec![url],
        Some(RpcUrlField::Multiple(list)) => list,
        None => Vec::new(),
    };

    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            urls.push(trimmed.to_string());
        }
    }

    Ok(urls)
}

impl Default for cfg::GlobalConfig {
    fn default() -> Self {
        Self {
            rpc_urls: Vec::new(),
            commitment: default_commitment(),
            logging: cfg::LoggingConfig::default(),
        }
    }
}

impl Default for cfg::LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_logging_level(),
            json: false,
            timezone_offset_hours: default_timezone_offset_hours(),
        }
    }
}

impl Default for cfg::CustodyConfig {
    fn default() -> Self {
        Self {
            base_url: default_custody_base_url(),
            app_id: None,
            app_secret: None,
            app_id_header: default_custody_app_id_header(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for cfg::AssemblerConfig {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            preflight_commitment: default_commitment(),
            max_retries: None,
            read_timeout_ms: default_read_timeout_ms(),
            sign_timeout_ms: default_http_timeout_ms(),
            submit_timeout_ms: default_http_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            compute_unit_price_micro_lamports: None,
        }
    }
}

impl Default for cfg::JupiterConfig {
    fn default() -> Self {
        Self {
            base_url: default_jupiter_base_url(),
            timeout_ms: default_read_timeout_ms(),
            slippage_bps: default_slippage_bps(),
            api_key: None,
        }
    }
}

impl Default for cfg::PositionsConfig {
    fn default() -> Self {
        Self {
            base_url: default_positions_base_url(),
            timeout_ms: default_http_timeout_ms(),
            pool_cache_ttl_secs: default_pool_cache_ttl_secs(),
            default_range_bins: default_range_bins(),
        }
    }
}

impl Default for cfg::RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

impl Default for cfg::PrometheusConfig {
    fn default() -> Self {
        Self {
            enable: false,
            listen: default_prometheus_listen(),
        }
    }
}
