use std::fmt;

use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

/// 节点拒绝交易的原因分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    BlockhashNotFound,
    InsufficientFunds,
    SimulationFailed,
    Other,
}

impl RejectionKind {
    pub fn label(&self) -> &'static str {
        match self {
            RejectionKind::BlockhashNotFound => "blockhash_not_found",
            RejectionKind::InsufficientFunds => "insufficient_funds",
            RejectionKind::SimulationFailed => "simulation_failed",
            RejectionKind::Other => "other",
        }
    }
}

/// 节点返回的拒绝信息，`reason` 原样保留节点报文。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn from_transaction_error(err: &TransactionError) -> Self {
        Self::new(classify(err), err.to_string())
    }

    pub fn is_stale_blockhash(&self) -> bool {
        matches!(self.kind, RejectionKind::BlockhashNotFound)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.label(), self.reason)
    }
}

#[derive(Debug, Error)]
pub enum LanderError {
    #[error("节点拒绝交易: {0}")]
    Rejected(Rejection),
    #[error("RPC 网络请求失败: {0}")]
    Transport(String),
    #[error("RPC 请求失败: {0}")]
    Rpc(String),
}

impl LanderError {
    pub fn is_transient(&self) -> bool {
        match self {
            LanderError::Rejected(rejection) => rejection.is_stale_blockhash(),
            LanderError::Transport(_) => true,
            LanderError::Rpc(_) => false,
        }
    }
}

impl From<ClientError> for LanderError {
    fn from(err: ClientError) -> Self {
        if let Some(tx_err) = err.get_transaction_error() {
            return LanderError::Rejected(Rejection::new(classify(&tx_err), err.to_string()));
        }
        match err.kind() {
            ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
                LanderError::Transport(err.to_string())
            }
            ClientErrorKind::RpcError(_) => LanderError::Rejected(Rejection::new(
                RejectionKind::SimulationFailed,
                err.to_string(),
            )),
            _ => LanderError::Rpc(err.to_string()),
        }
    }
}

fn classify(err: &TransactionError) -> RejectionKind {
    match err {
        TransactionError::BlockhashNotFound => RejectionKind::BlockhashNotFound,
        TransactionError::InsufficientFundsForFee
        | TransactionError::InsufficientFundsForRent { .. } => RejectionKind::InsufficientFunds,
        TransactionError::InstructionError(..) => RejectionKind::SimulationFailed,
        _ => RejectionKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_blockhash_is_transient() {
        let err = LanderError::Rejected(Rejection::new(
            RejectionKind::BlockhashNotFound,
            "Blockhash not found",
        ));
        assert!(err.is_transient());

        let err = LanderError::Rejected(Rejection::new(
            RejectionKind::InsufficientFunds,
            "insufficient funds for fee",
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn client_transaction_errors_are_classified() {
        let err = ClientError::from(TransactionError::BlockhashNotFound);
        match LanderError::from(err) {
            LanderError::Rejected(rejection) => {
                assert_eq!(rejection.kind, RejectionKind::BlockhashNotFound)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
