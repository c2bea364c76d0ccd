pub mod error;
mod rpc;

use async_trait::async_trait;
use solana_commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;

pub use error::{LanderError, Rejection, RejectionKind};
pub use rpc::RpcLander;

/// 提交参数，对应 `sendTransaction` 的 preflight 配置。
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    pub skip_preflight: bool,
    pub preflight_commitment: CommitmentLevel,
    pub max_retries: Option<usize>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            preflight_commitment: CommitmentLevel::Confirmed,
            max_retries: None,
        }
    }
}

/// 链上广播端：获取最新区块哈希并提交已签名交易。实现需支持并发调用。
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn latest_blockhash(&self, commitment: CommitmentConfig) -> Result<Hash, LanderError>;

    async fn submit(
        &self,
        transaction: &VersionedTransaction,
        options: SubmitOptions,
    ) -> Result<Signature, LanderError>;

    /// 等待交易达到指定确认级别；链上执行失败时返回 `Rejected`。
    /// 调用方负责超时。
    async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<(), LanderError>;
}
