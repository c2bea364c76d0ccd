//! 面向用户的钱包操作：各自构造或获取交易模板，再交给组装器完成双签与广播。

use thiserror::Error;

use crate::api::jupiter::JupiterError;
use crate::api::positions::PositionApiError;
use crate::engine::{AssemblyError, BatchAssemblyError};

pub mod position;
pub mod swap;
pub mod transfer;

pub use position::{ClaimOutcome, OpenPositionParams, PositionFlows, PositionReceipt};
pub use swap::{SwapParams, SwapReceipt, SwapSource, swap};
pub use transfer::{TransferRequest, decimal_sol_to_lamports, decimal_to_raw_amount, transfer};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("参数无效: {0}")]
    InvalidInput(String),
    #[error("链上查询失败: {0}")]
    Chain(String),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Batch(#[from] BatchAssemblyError),
    #[error(transparent)]
    Jupiter(#[from] JupiterError),
    #[error(transparent)]
    Positions(#[from] PositionApiError),
}
