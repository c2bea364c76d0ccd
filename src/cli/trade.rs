use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::args::{SendArgs, SwapArgs, TransferArgs};
use crate::cli::context::AppContext;
use crate::engine::{BuilderOutput, CoSigner};
use crate::flows::{SwapParams, TransferRequest, swap, transfer};

pub async fn handle_transfer_cmd(args: TransferArgs, ctx: &AppContext) -> Result<()> {
    let handle = ctx.handle(&args.user.user)?;
    let assembler = ctx.assembler()?;
    let request = TransferRequest {
        recipient: args.to,
        amount: args.amount,
        mint: args.mint,
        compute_unit_price_micro_lamports: ctx.compute_unit_price(),
    };
    let signature = transfer(&assembler, &ctx.rpc_client, &handle, &request).await?;
    println!("✅ 转账已提交: {signature}");
    Ok(())
}

pub async fn handle_swap_cmd(args: SwapArgs, ctx: &AppContext) -> Result<()> {
    let handle = ctx.handle(&args.user.user)?;
    let assembler = ctx.assembler()?;
    let jupiter = ctx.jupiter();
    let params = SwapParams {
        input_mint: args.input,
        output_mint: args.output,
        amount: args.amount,
        slippage_bps: args.slippage_bps.unwrap_or(ctx.config.jupiter.slippage_bps),
    };
    let receipt = swap(&assembler, &jupiter, &handle, &params).await?;
    println!(
        "✅ 兑换已提交: {} (in {} / out {}, price impact {}%)",
        receipt.signature, receipt.in_amount, receipt.out_amount, receipt.price_impact_pct
    );
    Ok(())
}

/// 运维工具：直接组装磁盘上的模板。Ctrl-C 在广播前取消。
pub async fn handle_send_cmd(args: SendArgs, ctx: &AppContext) -> Result<()> {
    let handle = ctx.handle(&args.user.user)?;
    let encoded = tokio::fs::read_to_string(&args.template)
        .await
        .with_context(|| format!("读取交易模板失败: {}", args.template.display()))?;
    let co_signer = args
        .co_signer_file
        .as_deref()
        .map(CoSigner::from_file)
        .transpose()?;
    let assembler = ctx.assembler()?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(target: "cli::send", "收到 Ctrl-C，取消当前组装");
                cancel.cancel();
            }
        })
    };

    let outcome = assembler
        .assemble_and_send_with_cancel(
            BuilderOutput::Encoded(encoded.trim().to_string()),
            co_signer.as_ref(),
            &handle,
            &cancel,
        )
        .await;
    watcher.abort();
    let signature = outcome?;
    println!("✅ 交易已提交: {signature}");
    Ok(())
}
