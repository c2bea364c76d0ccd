use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::api::serde_helpers::field_as_string;

#[derive(Debug, Clone, Serialize)]
pub struct CreateWalletRequest {
    pub chain_type: &'static str,
}

impl Default for CreateWalletRequest {
    fn default() -> Self {
        Self {
            chain_type: "solana",
        }
    }
}

/// 托管服务返回的钱包记录。
#[derive(Debug, Clone, Deserialize)]
pub struct WalletRecord {
    pub id: String,
    #[serde(with = "field_as_string")]
    pub address: Pubkey,
    #[serde(default)]
    pub chain_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignTransactionRequest<'a> {
    pub method: &'static str,
    pub params: SignTransactionParams<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignTransactionParams<'a> {
    pub transaction: &'a str,
    pub encoding: &'static str,
}

impl<'a> SignTransactionRequest<'a> {
    pub fn base64(transaction: &'a str) -> Self {
        Self {
            method: "signTransaction",
            params: SignTransactionParams {
                transaction,
                encoding: "base64",
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignTransactionResponse {
    #[serde(default)]
    pub method: Option<String>,
    pub data: SignedTransactionData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedTransactionData {
    pub signed_transaction: String,
    #[serde(default)]
    pub encoding: Option<String>,
}
