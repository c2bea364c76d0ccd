//! 托管签名服务客户端（Privy 兼容接口）。私钥只存在于服务端，
//! 本地只持有 app 凭据并提交待签名交易。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::StatusCode;
use reqwest::header::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{Level, debug, info, warn};
use zeroize::Zeroizing;

use crate::config::CustodyConfig;
use crate::engine::{RemoteSigner, RemoteSignerError};
use crate::monitoring::guard_with_fields;

use super::{join_endpoint, normalize_base_url, record_request_metrics, summarize_error_body};

pub mod types;

pub use types::{SignTransactionRequest, SignTransactionResponse, WalletRecord};

const IDEMPOTENCY_HEADER: &str = "privy-idempotency-key";

#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("调用托管服务失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("托管服务凭据缺失: {0}")]
    MissingCredentials(&'static str),
    #[error("托管服务配置无效: {0}")]
    InvalidConfig(String),
    #[error("托管服务 {endpoint} 返回状态 {status}: {body}")]
    ApiStatus {
        endpoint: String,
        status: StatusCode,
        body: String,
    },
    #[error("托管服务响应格式不符合预期: {0}")]
    Schema(String),
}

impl From<CustodyError> for RemoteSignerError {
    fn from(err: CustodyError) -> Self {
        match err {
            CustodyError::ApiStatus { status, body, .. } => match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    RemoteSignerError::Unauthorized(body)
                }
                StatusCode::NOT_FOUND => RemoteSignerError::WalletNotFound(body),
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    RemoteSignerError::MalformedTransaction(body)
                }
                other => RemoteSignerError::Service(format!("{other}: {body}")),
            },
            CustodyError::Http(err) => RemoteSignerError::Transport(err.to_string()),
            CustodyError::MissingCredentials(field) => {
                RemoteSignerError::Unauthorized(format!("missing {field}"))
            }
            CustodyError::InvalidConfig(message) => RemoteSignerError::Unauthorized(message),
            CustodyError::Schema(message) => RemoteSignerError::Service(message),
        }
    }
}

#[derive(Clone)]
pub struct CustodyClient {
    base_url: String,
    client: reqwest::Client,
    app_id: String,
    app_secret: Zeroizing<String>,
    app_id_header: HeaderName,
    timeout: Duration,
}

impl fmt::Debug for CustodyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyClient")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CustodyClient {
    pub fn from_config(client: reqwest::Client, config: &CustodyConfig) -> Result<Self, CustodyError> {
        let app_id = config
            .app_id
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or(CustodyError::MissingCredentials("custody.app_id"))?;
        let app_secret = config
            .app_secret
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or(CustodyError::MissingCredentials("custody.app_secret"))?;
        let app_id_header = HeaderName::from_bytes(config.app_id_header.trim().as_bytes())
            .map_err(|err| {
                CustodyError::InvalidConfig(format!(
                    "app_id_header `{}` 无效: {err}",
                    config.app_id_header
                ))
            })?;

        Ok(Self {
            base_url: normalize_base_url(&config.base_url),
            client,
            app_id,
            app_secret: Zeroizing::new(app_secret),
            app_id_header,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 新建 Solana 托管钱包。每次调用携带独立的幂等键。
    pub async fn create_wallet(&self) -> Result<WalletRecord, CustodyError> {
        let url = join_endpoint(&self.base_url, "/v1/wallets");
        let idempotency_key = uuid::Uuid::new_v4().to_string();
        let request = self
            .authorized(self.client.post(&url))?
            .header(IDEMPOTENCY_HEADER, idempotency_key.as_str())
            .json(&types::CreateWalletRequest::default());

        let wallet: WalletRecord = self.execute("create_wallet", url, request).await?;
        info!(
            target: "api::custody",
            wallet_id = %wallet.id,
            address = %wallet.address,
            idempotency_key = %idempotency_key,
            "托管钱包已创建"
        );
        Ok(wallet)
    }

    pub async fn get_wallet(&self, wallet_id: &str) -> Result<WalletRecord, CustodyError> {
        let url = join_endpoint(&self.base_url, &format!("/v1/wallets/{wallet_id}"));
        let request = self.authorized(self.client.get(&url))?;
        self.execute("get_wallet", url, request).await
    }

    /// 提交 base64 交易，返回托管服务签名后的 base64 交易。
    pub async fn sign_transaction_base64(
        &self,
        wallet_id: &str,
        transaction: &str,
    ) -> Result<String, CustodyError> {
        let url = join_endpoint(&self.base_url, &format!("/v1/wallets/{wallet_id}/rpc"));
        debug!(
            target: "api::custody",
            wallet_id,
            tx_len = transaction.len(),
            "开始请求托管签名"
        );
        let request = self
            .authorized(self.client.post(&url))?
            .json(&SignTransactionRequest::base64(transaction));
        let response: SignTransactionResponse = self.execute("sign_transaction", url, request).await?;
        if let Some(encoding) = response.data.encoding.as_deref() {
            if encoding != "base64" {
                return Err(CustodyError::Schema(format!(
                    "签名结果编码为 {encoding}，期望 base64"
                )));
            }
        }
        Ok(response.data.signed_transaction)
    }

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, CustodyError> {
        let app_id = HeaderValue::from_str(&self.app_id)
            .map_err(|err| CustodyError::InvalidConfig(format!("app_id 含非法字符: {err}")))?;
        Ok(builder
            .timeout(self.timeout)
            .basic_auth(&self.app_id, Some(self.app_secret.as_str()))
            .header(self.app_id_header.clone(), app_id))
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        url: String,
        request: reqwest::RequestBuilder,
    ) -> Result<T, CustodyError> {
        let guard = guard_with_fields(
            format!("custody.{stage}"),
            Level::DEBUG,
            vec![("url", url.clone())],
        );

        let response = request.send().await.map_err(|err| {
            record_request_metrics("custody", stage, "transport_error", None, None);
            warn!(
                target: "api::custody",
                stage,
                endpoint = %url,
                error = %err,
                "托管服务请求失败"
            );
            CustodyError::from(err)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|err| format!("<body decode failed: {err}>"));
            let body = summarize_error_body(body_text);
            warn!(
                target: "api::custody",
                stage,
                status = status.as_u16(),
                endpoint = %url,
                body = %body,
                "托管服务返回非 2xx 状态"
            );
            record_request_metrics("custody", stage, "http_error", Some(status), None);
            return Err(CustodyError::ApiStatus {
                endpoint: url,
                status,
                body,
            });
        }

        let parsed = response.json::<T>().await.map_err(|err| {
            record_request_metrics("custody", stage, "schema_error", Some(status), None);
            CustodyError::Schema(format!("解析 {stage} 响应失败: {err}"))
        })?;

        let elapsed_ms = guard.finish().as_secs_f64() * 1_000.0;
        record_request_metrics("custody", stage, "success", Some(status), Some(elapsed_ms));
        Ok(parsed)
    }
}

#[async_trait]
impl RemoteSigner for CustodyClient {
    async fn sign_transaction(
        &self,
        wallet_id: &str,
        transaction: &[u8],
    ) -> Result<Vec<u8>, RemoteSignerError> {
        let encoded = BASE64_STANDARD.encode(transaction);
        let signed = self.sign_transaction_base64(wallet_id, &encoded).await?;
        BASE64_STANDARD
            .decode(signed.trim())
            .map_err(|err| RemoteSignerError::Service(format!("签名结果不是合法 base64: {err}")))
    }
}
