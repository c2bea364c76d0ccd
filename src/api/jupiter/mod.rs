use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderValue;
use serde_json::Value;
use thiserror::Error;
use tracing::{Level, debug, info, warn};

use crate::config::JupiterConfig;
use crate::engine::BuilderOutput;
use crate::monitoring::guard_with_fields;

use super::{join_endpoint, normalize_base_url, record_request_metrics, summarize_error_body};

pub mod types;

pub use types::{QuoteRequest, QuoteResponse, SwapMode, SwapRequest, SwapResponse};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum JupiterError {
    #[error("调用 Jupiter API 失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Jupiter API {endpoint} 返回状态 {status}: {body}")]
    ApiStatus {
        endpoint: String,
        status: StatusCode,
        body: String,
    },
    #[error("Jupiter 响应格式不符合预期: {0}")]
    Schema(String),
    #[error("Jupiter API key 无效: {0}")]
    InvalidApiKey(String),
}

#[derive(Clone, Debug)]
pub struct JupiterApiClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    api_key: Option<String>,
}

impl JupiterApiClient {
    pub fn new(client: reqwest::Client, config: &JupiterConfig) -> Self {
        Self {
            base_url: normalize_base_url(&config.base_url),
            client,
            request_timeout: Duration::from_millis(config.timeout_ms),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
        }
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, JupiterError> {
        let url = join_endpoint(&self.base_url, "/quote");
        debug!(
            target: "api::jupiter",
            input_mint = %request.input_mint,
            output_mint = %request.output_mint,
            amount = request.amount,
            slippage_bps = request.slippage_bps,
            "开始请求 Jupiter /quote"
        );
        let http_request = self
            .with_api_key(self.client.get(&url))?
            .timeout(self.request_timeout)
            .query(request);

        let value = self.execute("quote", url, http_request).await?;
        let quote = QuoteResponse::try_from_value(value)
            .map_err(|err| JupiterError::Schema(format!("解析报价响应失败: {err}")))?;

        info!(
            target: "api::jupiter",
            input_mint = %quote.input_mint,
            output_mint = %quote.output_mint,
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            other_amount_threshold = quote.other_amount_threshold,
            price_impact_pct = %quote.price_impact_pct,
            "报价请求完成"
        );
        Ok(quote)
    }

    /// 请求 swap 交易模板；返回值需经组装器以托管钱包为 fee payer 重建后再签名。
    pub async fn swap_transaction(
        &self,
        request: &SwapRequest<'_>,
    ) -> Result<SwapResponse, JupiterError> {
        let url = join_endpoint(&self.base_url, "/swap");
        let http_request = self
            .with_api_key(self.client.post(&url))?
            .timeout(self.request_timeout)
            .json(request);

        let value = self.execute("swap", url, http_request).await?;
        let response: SwapResponse = serde_json::from_value(value)
            .map_err(|err| JupiterError::Schema(format!("解析 swap 响应失败: {err}")))?;

        info!(
            target: "api::jupiter",
            user = %request.user_public_key,
            tx_len = response.swap_transaction.len(),
            last_valid_block_height = ?response.last_valid_block_height,
            prioritization_fee_lamports = ?response.prioritization_fee_lamports,
            "已获取 swap 交易模板"
        );
        Ok(response)
    }

    fn with_api_key(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, JupiterError> {
        match &self.api_key {
            Some(key) => {
                let value = HeaderValue::from_str(key.trim())
                    .map_err(|err| JupiterError::InvalidApiKey(err.to_string()))?;
                Ok(builder.header(API_KEY_HEADER, value))
            }
            None => Ok(builder),
        }
    }

    async fn execute(
        &self,
        stage: &'static str,
        url: String,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, JupiterError> {
        let guard = guard_with_fields(
            format!("jupiter.{stage}"),
            Level::DEBUG,
            vec![("url", url.clone())],
        );

        let response = request.send().await.map_err(|err| {
            record_request_metrics("jupiter", stage, "transport_error", None, None);
            JupiterError::from(err)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|err| format!("<body decode failed: {err}>"));
            let body = summarize_error_body(body_text);
            warn!(
                target: "api::jupiter",
                stage,
                status = status.as_u16(),
                endpoint = %url,
                body = %body,
                "Jupiter 返回非 200 状态"
            );
            record_request_metrics("jupiter", stage, "http_error", Some(status), None);
            return Err(JupiterError::ApiStatus {
                endpoint: url,
                status,
                body,
            });
        }

        let value: Value = response.json().await.map_err(|err| {
            record_request_metrics("jupiter", stage, "decode_error", Some(status), None);
            JupiterError::from(err)
        })?;
        let elapsed_ms = guard.finish().as_secs_f64() * 1_000.0;
        record_request_metrics("jupiter", stage, "success", Some(status), Some(elapsed_ms));
        Ok(value)
    }
}

impl SwapResponse {
    pub fn into_template(self) -> BuilderOutput {
        BuilderOutput::Encoded(self.swap_transaction)
    }
}
