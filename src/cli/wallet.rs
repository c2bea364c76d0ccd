use anyhow::Result;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use tracing::warn;

use crate::cli::args::{BalanceArgs, UserArg, WalletCmd};
use crate::cli::context::AppContext;
use crate::engine::RemoteSignerHandle;
use crate::wallet::{RegistryError, WalletBalances, WalletRegistry, fetch_balances};

pub async fn handle_wallet_cmd(cmd: WalletCmd, ctx: &AppContext) -> Result<()> {
    match cmd {
        WalletCmd::Create(args) => create_wallet(args, ctx).await,
        WalletCmd::Show(args) => show_wallet(args, ctx).await,
    }
}

async fn show_wallet(args: UserArg, ctx: &AppContext) -> Result<()> {
    let handle = ctx.handle(&args.user)?;
    let remote = ctx.custody()?.get_wallet(&handle.wallet_id).await?;
    if remote.address != handle.address {
        anyhow::bail!(
            "托管服务返回的地址 {} 与本地记录 {} 不一致",
            remote.address,
            handle.address
        );
    }
    println!("用户 {}", args.user);
    println!("  钱包 ID: {}", handle.wallet_id);
    println!("  地址:    {}", handle.address);
    Ok(())
}

async fn create_wallet(args: UserArg, ctx: &AppContext) -> Result<()> {
    if let Some(existing) = ctx.registry.get(&args.user) {
        println!("用户 {} 已有钱包 {}", args.user, existing);
        return Ok(());
    }
    let custody = ctx.custody()?;
    let record = custody.create_wallet().await?;
    let handle = RemoteSignerHandle::new(record.id, record.address);
    record_wallet(&ctx.registry, &args.user, &handle).await?;
    println!("🔐 已为用户 {} 创建托管钱包", args.user);
    println!("  钱包 ID: {}", handle.wallet_id);
    println!("  地址:    {}", handle.address);
    Ok(())
}

/// 托管端已建好钱包；登记失败时该钱包成为孤儿，日志保留 wallet_id 供人工补录。
async fn record_wallet(
    registry: &WalletRegistry,
    user: &str,
    handle: &RemoteSignerHandle,
) -> Result<(), RegistryError> {
    registry
        .register(user, handle.clone())
        .await
        .inspect_err(|err| {
            warn!(
                target: "cli::wallet",
                user,
                wallet_id = %handle.wallet_id,
                address = %handle.address,
                error = %err,
                "托管钱包已创建但未登记"
            );
        })
}

pub async fn handle_balance_cmd(args: BalanceArgs, ctx: &AppContext) -> Result<()> {
    let handle = ctx.handle(&args.user.user)?;
    let balances = fetch_balances(&ctx.rpc_client, &handle.address).await?;
    for line in render_balances(&balances, args.mint.as_ref()) {
        println!("{line}");
    }
    Ok(())
}

fn render_balances(balances: &WalletBalances, mint: Option<&Pubkey>) -> Vec<String> {
    let mut lines = vec![format!("钱包 {}", balances.owner)];
    match mint {
        Some(mint) => match balances.token(mint) {
            Some(token) => lines.push(format!("  {}: {}", token.mint, token.ui_amount)),
            None => lines.push(format!("  {mint}: 0")),
        },
        None => {
            let sol = Decimal::from_i128_with_scale(i128::from(balances.lamports), 9).normalize();
            lines.push(format!("  SOL: {sol}"));
            for token in &balances.tokens {
                lines.push(format!("  {}: {}", token.mint, token.ui_amount));
            }
        }
    }
    lines
}
