use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use super::TandemConfig;

pub const DEFAULT_CONFIG_PATHS: &[&str] = &["tandem.toml", "config/tandem.toml"];

pub const ENV_RPC_URL: &str = "TANDEM_RPC_URL";
pub const ENV_CUSTODY_APP_ID: &str = "TANDEM_CUSTODY_APP_ID";
pub const ENV_CUSTODY_APP_SECRET: &str = "TANDEM_CUSTODY_APP_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config field {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// 依次尝试显式路径或默认路径，找不到文件时退回默认配置；最后叠加环境变量。
pub fn load_config(path: Option<PathBuf>) -> Result<TandemConfig, ConfigError> {
    let candidate_paths = match path {
        Some(p) => vec![p],
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<PathBuf>>(),
    };

    let mut config = None;
    for candidate in candidate_paths {
        if let Some(loaded) = try_load_file(&candidate)? {
            config = Some(loaded);
            break;
        }
    }

    let mut config = config.unwrap_or_default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_rpc_urls(&config)?;
    Ok(config)
}

/// RPC 地址必须是 http(s) URL。
pub fn validate_rpc_urls(config: &TandemConfig) -> Result<(), ConfigError> {
    for raw in &config.global.rpc_urls {
        let url = Url::parse(raw).map_err(|err| ConfigError::Invalid {
            field: "global.rpc_url",
            message: format!("{raw}: {err}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                field: "global.rpc_url",
                message: format!("{raw}: 不支持的协议 {}", url.scheme()),
            });
        }
    }
    Ok(())
}

pub fn apply_env_overrides<F>(config: &mut TandemConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(url) = non_empty(ENV_RPC_URL) {
        config.global.rpc_urls = vec![url.trim().to_string()];
    }
    if let Some(app_id) = non_empty(ENV_CUSTODY_APP_ID) {
        config.custody.app_id = Some(app_id);
    }
    if let Some(secret) = non_empty(ENV_CUSTODY_APP_SECRET) {
        config.custody.app_secret = Some(secret);
    }
}

fn try_load_file(path: &Path) -> Result<Option<TandemConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: TandemConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(Some(config))
}
