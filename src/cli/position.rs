use anyhow::Result;

use crate::cli::args::{OpenPositionArgs, PositionArgs, PositionCmd};
use crate::cli::context::AppContext;
use crate::flows::{ClaimOutcome, OpenPositionParams};

pub async fn handle_position_cmd(cmd: PositionCmd, ctx: &AppContext) -> Result<()> {
    match cmd {
        PositionCmd::Open(args) => open(args, ctx).await,
        PositionCmd::Close(args) => close(args, ctx).await,
        PositionCmd::Claim(args) => claim(args, ctx).await,
    }
}

async fn open(args: OpenPositionArgs, ctx: &AppContext) -> Result<()> {
    let handle = ctx.handle(&args.user.user)?;
    let assembler = ctx.assembler()?;
    let flows = ctx.position_flows();
    let params = OpenPositionParams {
        pool: args.pool,
        amount_x: args.amount_x,
        amount_y: args.amount_y,
        strategy: args.strategy.into(),
        range_bins: args.range,
    };
    let receipt = flows.open(&assembler, &handle, &params).await?;
    println!("✅ 仓位已创建: {}", receipt.position);
    for signature in &receipt.signatures {
        println!("  {signature}");
    }
    Ok(())
}

async fn close(args: PositionArgs, ctx: &AppContext) -> Result<()> {
    let handle = ctx.handle(&args.user.user)?;
    let assembler = ctx.assembler()?;
    let receipt = ctx
        .position_flows()
        .close(&assembler, &handle, &args.pool, &args.position)
        .await?;
    println!("✅ 仓位已关闭: {}", receipt.position);
    for signature in &receipt.signatures {
        println!("  {signature}");
    }
    Ok(())
}

async fn claim(args: PositionArgs, ctx: &AppContext) -> Result<()> {
    let handle = ctx.handle(&args.user.user)?;
    let assembler = ctx.assembler()?;
    match ctx
        .position_flows()
        .claim(&assembler, &handle, &args.pool, &args.position)
        .await?
    {
        ClaimOutcome::Claimed(signatures) => {
            println!("✅ 手续费已领取");
            for signature in &signatures {
                println!("  {signature}");
            }
        }
        ClaimOutcome::NoFeesAvailable => println!("仓位 {} 暂无可领取手续费", args.position),
    }
    Ok(())
}
