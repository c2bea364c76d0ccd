use std::fmt;

use solana_message::VersionedMessage;
use solana_sdk::message::Message;
use solana_sdk::message::v0::Message as V0Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, VersionedTransaction};

use crate::txs::{decode_base64_transaction, deserialize_transaction};

use super::error::{AssemblyError, AssemblyResult};

const SYSTEM_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("11111111111111111111111111111111");
/// `SystemInstruction::AdvanceNonceAccount` 的 bincode 判别值。
const ADVANCE_NONCE_DISCRIMINANT: [u8; 4] = [4, 0, 0, 0];

/// 外部构建器返回的原始产物，尚未判定形态。
#[derive(Debug, Clone)]
pub enum BuilderOutput {
    Legacy(Transaction),
    Versioned(VersionedTransaction),
    /// base64 线格式交易（聚合器、仓位构建服务返回的形式）。
    Encoded(String),
    /// 原始线格式字节。
    Wire(Vec<u8>),
    /// 已定稿的线格式载荷，只能原样转发，无法替换区块哈希。
    Sealed(Vec<u8>),
}

impl BuilderOutput {
    pub fn label(&self) -> &'static str {
        match self {
            BuilderOutput::Legacy(_) => "legacy",
            BuilderOutput::Versioned(_) => "versioned",
            BuilderOutput::Encoded(_) => "encoded",
            BuilderOutput::Wire(_) => "wire",
            BuilderOutput::Sealed(_) => "sealed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateShape {
    Versioned,
    Legacy,
}

impl TemplateShape {
    pub fn label(&self) -> &'static str {
        match self {
            TemplateShape::Versioned => "versioned",
            TemplateShape::Legacy => "legacy",
        }
    }
}

impl fmt::Display for TemplateShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct VersionedTemplate {
    pub message: V0Message,
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone)]
pub struct LegacyTemplate {
    pub message: Message,
    pub signatures: Vec<Signature>,
}

/// 判定后的交易模板。判定只在边界发生一次，之后不再检查运行时类型。
#[derive(Debug, Clone)]
pub enum TransactionTemplate {
    Versioned(VersionedTemplate),
    Legacy(LegacyTemplate),
}

impl TransactionTemplate {
    pub fn classify(output: BuilderOutput) -> AssemblyResult<Self> {
        let template = match output {
            BuilderOutput::Legacy(tx) => TransactionTemplate::Legacy(LegacyTemplate {
                message: tx.message,
                signatures: tx.signatures,
            }),
            BuilderOutput::Versioned(tx) => Self::from_versioned(tx),
            BuilderOutput::Encoded(encoded) => {
                let tx = decode_base64_transaction(&encoded)
                    .map_err(|err| AssemblyError::UnsupportedTemplateShape(err.to_string()))?;
                Self::from_versioned(tx)
            }
            BuilderOutput::Wire(bytes) => {
                let tx = deserialize_transaction(&bytes)
                    .map_err(|err| AssemblyError::UnsupportedTemplateShape(err.to_string()))?;
                Self::from_versioned(tx)
            }
            BuilderOutput::Sealed(bytes) => {
                return Err(AssemblyError::ImmutableTemplate(format!(
                    "已定稿的线格式载荷 ({} bytes) 无法替换区块哈希",
                    bytes.len()
                )));
            }
        };

        if template.uses_durable_nonce() {
            return Err(AssemblyError::ImmutableTemplate(
                "模板使用 durable nonce，区块哈希字段不可替换".to_string(),
            ));
        }
        Ok(template)
    }

    fn from_versioned(tx: VersionedTransaction) -> Self {
        match tx.message {
            VersionedMessage::Legacy(message) => TransactionTemplate::Legacy(LegacyTemplate {
                message,
                signatures: tx.signatures,
            }),
            VersionedMessage::V0(message) => TransactionTemplate::Versioned(VersionedTemplate {
                message,
                signatures: tx.signatures,
            }),
        }
    }

    pub fn shape(&self) -> TemplateShape {
        match self {
            TransactionTemplate::Versioned(_) => TemplateShape::Versioned,
            TransactionTemplate::Legacy(_) => TemplateShape::Legacy,
        }
    }

    pub fn message(&self) -> VersionedMessage {
        match self {
            TransactionTemplate::Versioned(template) => {
                VersionedMessage::V0(template.message.clone())
            }
            TransactionTemplate::Legacy(template) => {
                VersionedMessage::Legacy(template.message.clone())
            }
        }
    }

    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.static_account_keys().first()
    }

    /// 若模板已带有不属于 `rebuildable` 的签名，重建后无法复现该签名。
    pub fn ensure_rebuildable(&self, rebuildable: &[Pubkey]) -> AssemblyResult<()> {
        let keys = self.static_account_keys();
        for (index, signature) in self.signatures().iter().enumerate() {
            if *signature == Signature::default() {
                continue;
            }
            let Some(key) = keys.get(index) else {
                continue;
            };
            if !rebuildable.contains(key) {
                return Err(AssemblyError::ImmutableTemplate(format!(
                    "模板已包含第三方签名 {key}，重建后无法复现"
                )));
            }
        }
        Ok(())
    }

    fn static_account_keys(&self) -> &[Pubkey] {
        match self {
            TransactionTemplate::Versioned(template) => &template.message.account_keys,
            TransactionTemplate::Legacy(template) => &template.message.account_keys,
        }
    }

    fn signatures(&self) -> &[Signature] {
        match self {
            TransactionTemplate::Versioned(template) => &template.signatures,
            TransactionTemplate::Legacy(template) => &template.signatures,
        }
    }

    fn uses_durable_nonce(&self) -> bool {
        let keys = self.static_account_keys();
        let first = match self {
            TransactionTemplate::Versioned(template) => template.message.instructions.first(),
            TransactionTemplate::Legacy(template) => template.message.instructions.first(),
        };
        let Some(first) = first else {
            return false;
        };
        keys.get(first.program_id_index as usize) == Some(&SYSTEM_PROGRAM_ID)
            && first.data.starts_with(&ADVANCE_NONCE_DISCRIMINANT)
    }
}
