use async_trait::async_trait;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tracing::info;

use crate::api::jupiter::{JupiterApiClient, JupiterError, QuoteRequest, SwapRequest};
use crate::engine::{BuilderOutput, RemoteSignerHandle, TransactionAssembler};

use super::FlowError;

#[derive(Debug, Clone, Copy)]
pub struct SwapParams {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    /// 输入 mint 的最小单位数量。
    pub amount: u64,
    pub slippage_bps: u16,
}

/// 聚合器给出的报价与对应交易模板。
#[derive(Debug, Clone)]
pub struct QuotedSwap {
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: Decimal,
    pub template: BuilderOutput,
}

#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub signature: Signature,
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: Decimal,
}

/// 报价 + 交易模板来源。
#[async_trait]
pub trait SwapSource: Send + Sync {
    async fn quoted_swap(&self, params: &SwapParams, user: &Pubkey)
    -> Result<QuotedSwap, JupiterError>;
}

#[async_trait]
impl SwapSource for JupiterApiClient {
    async fn quoted_swap(
        &self,
        params: &SwapParams,
        user: &Pubkey,
    ) -> Result<QuotedSwap, JupiterError> {
        let request = QuoteRequest::new(
            params.input_mint,
            params.output_mint,
            params.amount,
            params.slippage_bps,
        );
        let quote = self.quote(&request).await?;
        let response = self.swap_transaction(&SwapRequest::new(&quote, *user)).await?;
        Ok(QuotedSwap {
            in_amount: quote.in_amount,
            out_amount: quote.out_amount,
            price_impact_pct: quote.price_impact_pct,
            template: response.into_template(),
        })
    }
}

/// 聚合器兑换。模板只需托管钱包签名，不涉及 co-signer。
pub async fn swap(
    assembler: &TransactionAssembler,
    source: &dyn SwapSource,
    handle: &RemoteSignerHandle,
    params: &SwapParams,
) -> Result<SwapReceipt, FlowError> {
    if params.amount == 0 {
        return Err(FlowError::InvalidInput("兑换数量必须大于 0".into()));
    }
    if params.input_mint == params.output_mint {
        return Err(FlowError::InvalidInput("输入与输出 mint 相同".into()));
    }

    let quoted = source.quoted_swap(params, &handle.address).await?;
    let signature = assembler
        .assemble_and_send(quoted.template, None, handle)
        .await?;

    info!(
        target: "flows::swap",
        wallet = %handle,
        input_mint = %params.input_mint,
        output_mint = %params.output_mint,
        in_amount = quoted.in_amount,
        out_amount = quoted.out_amount,
        signature = %signature,
        "兑换交易已提交"
    );
    Ok(SwapReceipt {
        signature,
        in_amount: quoted.in_amount,
        out_amount: quoted.out_amount,
        price_impact_pct: quoted.price_impact_pct,
    })
}
