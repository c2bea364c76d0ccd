use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, info, warn};

use super::error::{LanderError, Rejection};
use super::{Broadcaster, SubmitOptions};

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(400);

#[derive(Clone)]
pub struct RpcLander {
    client: Arc<RpcClient>,
}

impl RpcLander {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    fn send_config(options: SubmitOptions) -> RpcSendTransactionConfig {
        let mut config = RpcSendTransactionConfig::default();
        config.skip_preflight = options.skip_preflight;
        config.preflight_commitment = Some(options.preflight_commitment);
        config.max_retries = options.max_retries;
        config
    }
}

#[async_trait]
impl Broadcaster for RpcLander {
    async fn latest_blockhash(&self, commitment: CommitmentConfig) -> Result<Hash, LanderError> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(commitment)
            .await?;
        debug!(
            target: "lander::rpc",
            blockhash = %blockhash,
            last_valid_block_height,
            commitment = ?commitment.commitment,
            "fetched latest blockhash"
        );
        Ok(blockhash)
    }

    async fn submit(
        &self,
        transaction: &VersionedTransaction,
        options: SubmitOptions,
    ) -> Result<Signature, LanderError> {
        let config = Self::send_config(options);
        let result = self
            .client
            .send_transaction_with_config(transaction, config)
            .await;
        match result {
            Ok(signature) => {
                info!(
                    target: "lander::rpc",
                    signature = %signature,
                    blockhash = %transaction.message.recent_blockhash(),
                    skip_preflight = options.skip_preflight,
                    preflight_commitment = ?options.preflight_commitment,
                    max_retries = ?options.max_retries,
                    endpoint = %self.client.url(),
                    "transaction submitted via rpc client"
                );
                Ok(signature)
            }
            Err(err) => {
                let err = LanderError::from(err);
                warn!(
                    target: "lander::rpc",
                    error = %err,
                    endpoint = %self.client.url(),
                    "RPC 提交交易失败"
                );
                Err(err)
            }
        }
    }

    async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<(), LanderError> {
        loop {
            let status = self
                .client
                .get_signature_status_with_commitment(signature, commitment)
                .await?;
            match status {
                Some(Ok(())) => {
                    debug!(
                        target: "lander::rpc",
                        signature = %signature,
                        commitment = ?commitment.commitment,
                        "transaction confirmed"
                    );
                    return Ok(());
                }
                Some(Err(tx_err)) => {
                    warn!(
                        target: "lander::rpc",
                        signature = %signature,
                        error = %tx_err,
                        "交易上链执行失败"
                    );
                    return Err(LanderError::Rejected(Rejection::from_transaction_error(
                        &tx_err,
                    )));
                }
                None => tokio::time::sleep(CONFIRM_POLL_INTERVAL).await,
            }
        }
    }
}
