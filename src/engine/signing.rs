use std::fmt;
use std::path::Path;

use solana_message::VersionedMessage;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use zeroize::Zeroizing;

/// 本地临时签名者（例如新仓位账户）。仅在一次操作内持有，不落盘；
/// 丢弃后底层密钥随之清零。
pub struct CoSigner {
    keypair: Keypair,
}

impl CoSigner {
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::new(),
        }
    }

    /// 读取密钥文件：`solana-keygen` 的 JSON 字节数组，或 base58 编码的 64 字节私钥。
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = Zeroizing::new(std::fs::read_to_string(path)?);
        Self::from_keypair_str(&raw)
    }

    pub fn from_keypair_str(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            anyhow::bail!("keypair string empty");
        }
        let bytes: Zeroizing<Vec<u8>> = if trimmed.starts_with('[') {
            Zeroizing::new(serde_json::from_str(trimmed)?)
        } else {
            Zeroizing::new(bs58::decode(trimmed).into_vec()?)
        };
        let keypair = Keypair::try_from(bytes.as_slice())?;
        Ok(Self { keypair })
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign_message(message)
    }
}

impl fmt::Debug for CoSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoSigner")
            .field("pubkey", &self.pubkey())
            .finish()
    }
}

/// 为消息构造签名位全部为空的交易。
pub fn unsigned_transaction(message: VersionedMessage) -> VersionedTransaction {
    let required = message.header().num_required_signatures as usize;
    VersionedTransaction {
        signatures: vec![Signature::default(); required],
        message,
    }
}

pub fn signer_index(message: &VersionedMessage, pubkey: &Pubkey) -> Option<usize> {
    let required = message.header().num_required_signatures as usize;
    message
        .static_account_keys()
        .iter()
        .take(required)
        .position(|key| key == pubkey)
}

pub fn required_signer_keys(message: &VersionedMessage) -> Vec<Pubkey> {
    let required = message.header().num_required_signatures as usize;
    message
        .static_account_keys()
        .iter()
        .take(required)
        .copied()
        .collect()
}

/// 校验签名位：返回签名缺失或无法通过验签的账户。
pub fn missing_signers(tx: &VersionedTransaction) -> Vec<Pubkey> {
    let message_bytes = tx.message.serialize();
    required_signer_keys(&tx.message)
        .into_iter()
        .enumerate()
        .filter(|(index, key)| match tx.signatures.get(*index) {
            Some(signature) => {
                *signature == Signature::default()
                    || !signature.verify(key.as_ref(), &message_bytes)
            }
            None => true,
        })
        .map(|(_, key)| key)
        .collect()
}

/// 在指定签名位写入 co-signer 签名；签名位不足时补齐。
/// 返回是否发生了改写。
pub fn apply_co_signature(tx: &mut VersionedTransaction, co_signer: &CoSigner) -> Option<bool> {
    let index = signer_index(&tx.message, &co_signer.pubkey())?;
    let required = tx.message.header().num_required_signatures as usize;
    if tx.signatures.len() < required {
        tx.signatures.resize(required, Signature::default());
    }
    let message_bytes = tx.message.serialize();
    let current = tx.signatures[index];
    if current != Signature::default()
        && current.verify(co_signer.pubkey().as_ref(), &message_bytes)
    {
        return Some(false);
    }
    tx.signatures[index] = co_signer.sign(&message_bytes);
    Some(true)
}
