use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// 托管钱包标识：服务端钱包 ID + 链上地址。私钥永远不离开托管服务。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteSignerHandle {
    pub wallet_id: String,
    #[serde(with = "crate::api::serde_helpers::field_as_string")]
    pub address: Pubkey,
}

impl RemoteSignerHandle {
    pub fn new(wallet_id: impl Into<String>, address: Pubkey) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            address,
        }
    }
}

impl fmt::Display for RemoteSignerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.wallet_id, self.address)
    }
}

#[derive(Debug, Clone, Error)]
pub enum RemoteSignerError {
    #[error("托管服务鉴权失败: {0}")]
    Unauthorized(String),
    #[error("托管钱包不存在: {0}")]
    WalletNotFound(String),
    #[error("托管服务拒绝交易格式: {0}")]
    MalformedTransaction(String),
    #[error("托管服务网络请求失败: {0}")]
    Transport(String),
    #[error("托管服务响应异常: {0}")]
    Service(String),
}

impl RemoteSignerError {
    /// 网络抖动与服务端 5xx 可由调用方决定是否重试。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteSignerError::Transport(_) | RemoteSignerError::Service(_)
        )
    }
}

/// 远端签名服务契约：提交交易字节，返回同形态的已签名交易字节。
/// 需同时接受 legacy 与 v0 线格式。
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    async fn sign_transaction(
        &self,
        wallet_id: &str,
        transaction: &[u8],
    ) -> Result<Vec<u8>, RemoteSignerError>;
}
