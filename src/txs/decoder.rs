use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bincode::error::{DecodeError, EncodeError};
use bincode::serde::{decode_from_slice, encode_to_vec};
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;

/// 解码 base64 编码的交易（legacy 与 v0 共用同一线格式）。
pub fn decode_base64_transaction(encoded: &str) -> Result<VersionedTransaction, DecodeTxError> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(DecodeTxError::Base64)?;
    deserialize_transaction(&bytes)
}

/// 将交易重新序列化为 base64 字符串，便于对比或落盘。
pub fn encode_base64_transaction(tx: &VersionedTransaction) -> Result<String, EncodeTxError> {
    let bytes = serialize_transaction(tx)?;
    Ok(BASE64_STANDARD.encode(bytes))
}

pub fn serialize_transaction(tx: &VersionedTransaction) -> Result<Vec<u8>, EncodeTxError> {
    encode_to_vec(tx, bincode_config()).map_err(EncodeTxError::Bincode)
}

/// 反序列化线格式交易，要求字节被完整消费。
pub fn deserialize_transaction(bytes: &[u8]) -> Result<VersionedTransaction, DecodeTxError> {
    let (tx, consumed) = decode_from_slice::<VersionedTransaction, _>(bytes, bincode_config())
        .map_err(DecodeTxError::Bincode)?;
    if consumed != bytes.len() {
        return Err(DecodeTxError::TrailingBytes {
            consumed,
            total: bytes.len(),
        });
    }
    Ok(tx)
}

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

#[derive(Debug, Error)]
pub enum DecodeTxError {
    #[error("base64 解码失败: {0}")]
    Base64(base64::DecodeError),
    #[error("bincode 解码失败: {0}")]
    Bincode(DecodeError),
    #[error("交易字节存在尾随数据: 已解析 {consumed} / 共 {total}")]
    TrailingBytes { consumed: usize, total: usize },
}

#[derive(Debug, Error)]
pub enum EncodeTxError {
    #[error("bincode 编码失败: {0}")]
    Bincode(EncodeError),
}
