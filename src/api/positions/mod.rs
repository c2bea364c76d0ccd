//! DEX 仓位构建服务客户端。服务端运行官方 SDK，按请求返回仓位交易模板；
//! 本地只负责组装、签名与广播。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::{Level, debug, info, warn};

use crate::config::PositionsConfig;
use crate::engine::BuilderOutput;
use crate::monitoring::guard_with_fields;

use super::{join_endpoint, normalize_base_url, record_request_metrics, summarize_error_body};

pub mod types;

pub use types::{
    ClaimResponse, MAX_RANGE_BINS, OpenPositionRequest, PoolInfo, PositionRequest, StrategyKind,
    TemplatesResponse,
};

#[derive(Debug, Error)]
pub enum PositionApiError {
    #[error("调用仓位服务失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("仓位服务 {endpoint} 返回状态 {status}: {body}")]
    ApiStatus {
        endpoint: String,
        status: StatusCode,
        body: String,
    },
    #[error("仓位服务响应格式不符合预期: {0}")]
    Schema(String),
}

/// 手续费查询结果。没有可领取的手续费是正常结果而不是错误。
#[derive(Debug, Clone)]
pub enum FeeClaim {
    Claimable(Vec<BuilderOutput>),
    NoFeesAvailable,
}

impl FeeClaim {
    pub fn is_claimable(&self) -> bool {
        matches!(self, FeeClaim::Claimable(_))
    }
}

impl From<ClaimResponse> for FeeClaim {
    fn from(response: ClaimResponse) -> Self {
        match response {
            ClaimResponse::Claimable { transactions } if !transactions.is_empty() => {
                FeeClaim::Claimable(transactions.into_iter().map(BuilderOutput::Encoded).collect())
            }
            _ => FeeClaim::NoFeesAvailable,
        }
    }
}

/// 仓位交易模板来源。
#[async_trait]
pub trait PositionBuilder: Send + Sync {
    async fn pool(&self, pool: &Pubkey) -> Result<PoolInfo, PositionApiError>;

    async fn open_position(
        &self,
        request: &OpenPositionRequest,
    ) -> Result<Vec<BuilderOutput>, PositionApiError>;

    /// 全额撤出流动性并关闭仓位；可能返回多笔需按顺序提交的交易。
    async fn close_position(
        &self,
        request: &PositionRequest,
    ) -> Result<Vec<BuilderOutput>, PositionApiError>;

    async fn claim_fees(&self, request: &PositionRequest) -> Result<FeeClaim, PositionApiError>;
}

#[derive(Clone, Debug)]
pub struct PositionApiClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl PositionApiClient {
    pub fn new(client: reqwest::Client, config: &PositionsConfig) -> Self {
        Self {
            base_url: normalize_base_url(&config.base_url),
            client,
            request_timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        path: &str,
    ) -> Result<T, PositionApiError> {
        let url = join_endpoint(&self.base_url, path);
        let request = self.client.get(&url).timeout(self.request_timeout);
        self.execute(stage, url, request).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        stage: &'static str,
        path: &str,
        body: &B,
    ) -> Result<T, PositionApiError> {
        let url = join_endpoint(&self.base_url, path);
        let request = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(body);
        self.execute(stage, url, request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        url: String,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PositionApiError> {
        let guard = guard_with_fields(
            format!("positions.{stage}"),
            Level::DEBUG,
            vec![("url", url.clone())],
        );

        let response = request.send().await.map_err(|err| {
            record_request_metrics("positions", stage, "transport_error", None, None);
            PositionApiError::from(err)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|err| format!("<body decode failed: {err}>"));
            let body = summarize_error_body(body_text);
            warn!(
                target: "api::positions",
                stage,
                status = status.as_u16(),
                endpoint = %url,
                body = %body,
                "仓位服务返回非 2xx 状态"
            );
            record_request_metrics("positions", stage, "http_error", Some(status), None);
            return Err(PositionApiError::ApiStatus {
                endpoint: url,
                status,
                body,
            });
        }

        let parsed = response.json::<T>().await.map_err(|err| {
            record_request_metrics("positions", stage, "schema_error", Some(status), None);
            PositionApiError::Schema(format!("解析 {stage} 响应失败: {err}"))
        })?;
        let elapsed_ms = guard.finish().as_secs_f64() * 1_000.0;
        record_request_metrics("positions", stage, "success", Some(status), Some(elapsed_ms));
        Ok(parsed)
    }
}

fn into_templates(response: TemplatesResponse) -> Vec<BuilderOutput> {
    response
        .transactions
        .into_iter()
        .map(BuilderOutput::Encoded)
        .collect()
}

#[async_trait]
impl PositionBuilder for PositionApiClient {
    async fn pool(&self, pool: &Pubkey) -> Result<PoolInfo, PositionApiError> {
        let info: PoolInfo = self.get_json("pool", &format!("/pools/{pool}")).await?;
        if info.address != *pool {
            return Err(PositionApiError::Schema(format!(
                "请求池 {pool}，服务返回 {}",
                info.address
            )));
        }
        debug!(
            target: "api::positions",
            pool = %pool,
            active_bin_id = info.active_bin_id,
            bin_step = info.bin_step,
            "已获取池信息"
        );
        Ok(info)
    }

    async fn open_position(
        &self,
        request: &OpenPositionRequest,
    ) -> Result<Vec<BuilderOutput>, PositionApiError> {
        let response: TemplatesResponse =
            self.post_json("open", "/positions/open", request).await?;
        info!(
            target: "api::positions",
            pool = %request.pool,
            position = %request.position,
            templates = response.transactions.len(),
            "已获取开仓交易模板"
        );
        Ok(into_templates(response))
    }

    async fn close_position(
        &self,
        request: &PositionRequest,
    ) -> Result<Vec<BuilderOutput>, PositionApiError> {
        let response: TemplatesResponse =
            self.post_json("close", "/positions/close", request).await?;
        info!(
            target: "api::positions",
            pool = %request.pool,
            position = %request.position,
            templates = response.transactions.len(),
            "已获取平仓交易模板"
        );
        Ok(into_templates(response))
    }

    async fn claim_fees(&self, request: &PositionRequest) -> Result<FeeClaim, PositionApiError> {
        let response: ClaimResponse = self.post_json("claim", "/positions/claim", request).await?;
        let claim = FeeClaim::from(response);
        info!(
            target: "api::positions",
            pool = %request.pool,
            position = %request.position,
            claimable = claim.is_claimable(),
            "手续费查询完成"
        );
        Ok(claim)
    }
}
