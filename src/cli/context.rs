use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use solana_client::nonblocking::rpc_client::RpcClient;
use time::{UtcOffset, macros::format_description};
use tracing::info;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::{EnvFilter, fmt};

use crate::api::custody::CustodyClient;
use crate::api::jupiter::JupiterApiClient;
use crate::api::positions::PositionApiClient;
use crate::cache::{AltCache, PoolCache};
use crate::config::{AssemblerConfig, ConfigError, TandemConfig, load_config};
use crate::engine::{AssemblerSettings, RemoteSignerHandle, TransactionAssembler};
use crate::flows::PositionFlows;
use crate::lander::{RpcLander, SubmitOptions};
use crate::wallet::WalletRegistry;

const USER_AGENT: &str = concat!("tandem/", env!("CARGO_PKG_VERSION"));

/// 初始化 tracing，兼顾 JSON 与文本输出模式。
pub fn init_tracing(config: &crate::config::LoggingConfig) -> Result<()> {
    let mut filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    // 压低 HTTP 依赖的调试输出。
    const QUIET_TARGETS: &[(&str, &str)] = &[
        ("hyper", "warn"),
        ("hyper_util::client::legacy", "warn"),
        ("reqwest", "info"),
    ];
    for (module, level) in QUIET_TARGETS {
        if !config.level.contains(module) {
            if let Ok(directive) = format!("{module}={level}").parse() {
                filter = filter.add_directive(directive);
            }
        }
    }

    let time_format =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
    let offset = UtcOffset::from_hms(config.timezone_offset_hours, 0, 0).map_err(|err| {
        anyhow!(
            "invalid logging timezone offset {}: {err}",
            config.timezone_offset_hours
        )
    })?;
    let offset_timer = OffsetTime::new(offset, time_format);

    let base = fmt()
        .with_timer(offset_timer)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(true)
        .with_level(true);

    if config.json {
        base.json()
            .with_current_span(false)
            .with_span_list(false)
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    } else {
        base.with_env_filter(filter)
            .event_format(fmt::format().compact())
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }
    Ok(())
}

/// 加载主配置；用于 `tandem --config` 的入口。
pub fn load_configuration(path: Option<PathBuf>) -> Result<TandemConfig, ConfigError> {
    load_config(path)
}

pub fn init_configs(args: crate::cli::args::InitCmd) -> Result<()> {
    let output_dir = match args.output {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    fs::create_dir_all(&output_dir)?;

    let templates: [(&str, &str); 1] = [(
        "tandem.toml",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tandem.toml")),
    )];

    for (filename, contents) in templates {
        let target_path = output_dir.join(filename);
        if target_path.exists() && !args.force {
            println!(
                "跳过 {}（文件已存在，如需覆盖请加 --force）",
                target_path.display()
            );
            continue;
        }

        fs::write(&target_path, contents)?;
        println!("已写入 {}", target_path.display());
    }

    Ok(())
}

pub fn assembler_settings(
    config: &AssemblerConfig,
    commitment: solana_commitment_config::CommitmentConfig,
) -> Result<AssemblerSettings, ConfigError> {
    Ok(AssemblerSettings {
        commitment,
        submit: SubmitOptions {
            skip_preflight: config.skip_preflight,
            preflight_commitment: config.preflight_commitment()?,
            max_retries: config.max_retries,
        },
        read_timeout: Duration::from_millis(config.read_timeout_ms.max(1)),
        sign_timeout: Duration::from_millis(config.sign_timeout_ms.max(1)),
        submit_timeout: Duration::from_millis(config.submit_timeout_ms.max(1)),
        confirm_timeout: Duration::from_millis(config.confirm_timeout_ms.max(1)),
    })
}

/// 命令执行期间共享的客户端与配置。
pub struct AppContext {
    pub config: TandemConfig,
    pub rpc_client: Arc<RpcClient>,
    pub http_client: reqwest::Client,
    pub registry: WalletRegistry,
}

impl AppContext {
    pub async fn new(config: TandemConfig) -> Result<Self> {
        let rpc_url = config
            .global
            .primary_rpc_url()
            .unwrap_or("https://api.mainnet-beta.solana.com")
            .to_string();
        let commitment = config.global.commitment()?;
        let rpc_client = Arc::new(RpcClient::new_with_commitment(rpc_url.clone(), commitment));
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| anyhow!("构建 HTTP 客户端失败: {err}"))?;
        let registry = WalletRegistry::load(config.registry.path())
            .await
            .context("加载钱包注册表失败")?;

        info!(
            target: "cli::context",
            rpc = %rpc_url,
            commitment = ?commitment.commitment,
            registry = %registry.path().display(),
            wallets = registry.len(),
            "运行环境已就绪"
        );
        Ok(Self {
            config,
            rpc_client,
            http_client,
            registry,
        })
    }

    pub fn custody(&self) -> Result<Arc<CustodyClient>> {
        let client = CustodyClient::from_config(self.http_client.clone(), &self.config.custody)?;
        Ok(Arc::new(client))
    }

    pub fn assembler(&self) -> Result<TransactionAssembler> {
        let settings = assembler_settings(&self.config.assembler, self.config.global.commitment()?)?;
        let lander = Arc::new(RpcLander::new(self.rpc_client.clone()));
        let lookup_tables = Arc::new(AltCache::new(self.rpc_client.clone()));
        Ok(TransactionAssembler::new(self.custody()?, lander, settings).with_lookup_tables(lookup_tables))
    }

    pub fn jupiter(&self) -> JupiterApiClient {
        JupiterApiClient::new(self.http_client.clone(), &self.config.jupiter)
    }

    pub fn position_flows(&self) -> PositionFlows {
        let positions = &self.config.positions;
        let ttl = (positions.pool_cache_ttl_secs > 0)
            .then(|| Duration::from_secs(positions.pool_cache_ttl_secs));
        PositionFlows::new(
            Arc::new(PositionApiClient::new(self.http_client.clone(), positions)),
            Arc::new(PoolCache::new(ttl)),
            positions.default_range_bins,
        )
    }

    pub fn handle(&self, user: &str) -> Result<RemoteSignerHandle> {
        self.registry
            .require(user)
            .map_err(|err| anyhow!("{err}，请先执行 `tandem wallet create --user {user}`"))
    }

    pub fn compute_unit_price(&self) -> u64 {
        self.config
            .assembler
            .compute_unit_price_micro_lamports
            .unwrap_or_default()
    }
}
