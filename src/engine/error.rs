use std::fmt;

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::lander::{LanderError, Rejection};

use super::instructions::InstructionExtractionError;
use super::remote::RemoteSignerError;

/// 组装流程的阶段，用于超时与取消报错。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStage {
    Prepare,
    Blockhash,
    RemoteSign,
    Submit,
    Confirm,
}

impl AssemblyStage {
    pub fn label(&self) -> &'static str {
        match self {
            AssemblyStage::Prepare => "prepare",
            AssemblyStage::Blockhash => "blockhash",
            AssemblyStage::RemoteSign => "remote_sign",
            AssemblyStage::Submit => "submit",
            AssemblyStage::Confirm => "confirm",
        }
    }
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 调用方据此区分「修正输入」「可重试」「终止」。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidInput,
    Transient,
    Terminal,
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("不支持的交易模板格式: {0}")]
    UnsupportedTemplateShape(String),
    #[error("交易模板无法重建: {0}")]
    ImmutableTemplate(String),
    #[error("co-signer {0} 不是模板要求的签名账户")]
    UnexpectedCoSigner(Pubkey),
    #[error("交易缺少必需签名: {}", format_keys(.missing))]
    MissingSigner { missing: Vec<Pubkey> },
    #[error("指令解析失败: {0}")]
    Instructions(#[from] InstructionExtractionError),
    #[error("地址查找表解析失败: {0}")]
    LookupTables(String),
    #[error("交易消息编译失败: {0}")]
    Compile(String),
    #[error("交易编解码失败: {0}")]
    Codec(String),
    #[error("获取最新区块哈希失败: {0}")]
    Blockhash(LanderError),
    #[error("远端签名失败: {0}")]
    RemoteSigner(#[from] RemoteSignerError),
    #[error("远端签名返回的交易无法解析: {0}")]
    InvalidSignerResponse(String),
    #[error("远端签名返回的交易消息与提交内容不一致")]
    MessageMismatch,
    #[error("交易被节点拒绝: {0}")]
    BroadcastRejected(Rejection),
    #[error("交易提交失败: {0}")]
    Submit(LanderError),
    #[error("{stage} 阶段超时 ({timeout_ms} ms)")]
    Timeout { stage: AssemblyStage, timeout_ms: u64 },
    #[error("{stage} 阶段被取消")]
    Cancelled { stage: AssemblyStage },
}

pub type AssemblyResult<T> = Result<T, AssemblyError>;

impl AssemblyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AssemblyError::UnsupportedTemplateShape(_)
            | AssemblyError::ImmutableTemplate(_)
            | AssemblyError::UnexpectedCoSigner(_)
            | AssemblyError::MissingSigner { .. }
            | AssemblyError::Instructions(_)
            | AssemblyError::LookupTables(_)
            | AssemblyError::Compile(_)
            | AssemblyError::Codec(_) => ErrorClass::InvalidInput,
            AssemblyError::Blockhash(_) | AssemblyError::Timeout { .. } => ErrorClass::Transient,
            AssemblyError::RemoteSigner(err) => {
                if err.is_transient() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Terminal
                }
            }
            AssemblyError::BroadcastRejected(rejection) => {
                if rejection.is_stale_blockhash() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Terminal
                }
            }
            AssemblyError::Submit(err) => {
                if err.is_transient() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Terminal
                }
            }
            AssemblyError::InvalidSignerResponse(_)
            | AssemblyError::MessageMismatch
            | AssemblyError::Cancelled { .. } => ErrorClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AssemblyError::UnsupportedTemplateShape(_) => "unsupported_shape",
            AssemblyError::ImmutableTemplate(_) => "immutable_template",
            AssemblyError::UnexpectedCoSigner(_) => "unexpected_co_signer",
            AssemblyError::MissingSigner { .. } => "missing_signer",
            AssemblyError::Instructions(_) => "instructions",
            AssemblyError::LookupTables(_) => "lookup_tables",
            AssemblyError::Compile(_) => "compile",
            AssemblyError::Codec(_) => "codec",
            AssemblyError::Blockhash(_) => "blockhash",
            AssemblyError::RemoteSigner(_) => "remote_signer",
            AssemblyError::InvalidSignerResponse(_) => "invalid_signer_response",
            AssemblyError::MessageMismatch => "message_mismatch",
            AssemblyError::BroadcastRejected(_) => "broadcast_rejected",
            AssemblyError::Submit(_) => "submit",
            AssemblyError::Timeout { .. } => "timeout",
            AssemblyError::Cancelled { .. } => "cancelled",
        }
    }
}

fn format_keys(keys: &[Pubkey]) -> String {
    keys.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lander::RejectionKind;

    #[test]
    fn classes_split_input_transient_terminal() {
        let missing = AssemblyError::MissingSigner {
            missing: vec![Pubkey::new_unique()],
        };
        assert_eq!(missing.class(), ErrorClass::InvalidInput);

        let stale = AssemblyError::BroadcastRejected(Rejection::new(
            RejectionKind::BlockhashNotFound,
            "Blockhash not found",
        ));
        assert!(stale.is_retryable());

        let unauthorized =
            AssemblyError::RemoteSigner(RemoteSignerError::Unauthorized("bad secret".into()));
        assert_eq!(unauthorized.class(), ErrorClass::Terminal);

        let timeout = AssemblyError::Timeout {
            stage: AssemblyStage::RemoteSign,
            timeout_ms: 5_000,
        };
        assert_eq!(timeout.class(), ErrorClass::Transient);
        assert_eq!(timeout.to_string(), "remote_sign 阶段超时 (5000 ms)");
    }
}
