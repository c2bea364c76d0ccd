use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use solana_account_decoder::{UiAccountData, UiAccountEncoding};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcAccountInfoConfig, RpcTokenAccountsFilter};
use solana_client::rpc_request::RpcRequest;
use solana_client::rpc_response::{Response as RpcResponse, RpcKeyedAccount};
use solana_sdk::pubkey::Pubkey;
use spl_token_2022::extension::StateWithExtensions;
use spl_token_2022::state::Mint;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub struct TokenBalance {
    pub mint: Pubkey,
    pub account: Pubkey,
    pub token_program: Pubkey,
    pub amount: u64,
    pub decimals: u8,
    pub ui_amount: String,
}

#[derive(Clone, Debug)]
pub struct WalletBalances {
    pub owner: Pubkey,
    pub lamports: u64,
    pub tokens: Vec<TokenBalance>,
}

impl WalletBalances {
    pub fn token(&self, mint: &Pubkey) -> Option<&TokenBalance> {
        self.tokens.iter().find(|balance| balance.mint == *mint)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MintInfo {
    pub token_program: Pubkey,
    pub decimals: u8,
}

/// SOL 余额 + Token / Token-2022 账户余额，按 mint 排序。
pub async fn fetch_balances(rpc_client: &Arc<RpcClient>, owner: &Pubkey) -> Result<WalletBalances> {
    let (lamports, classic, extended) = futures::try_join!(
        async {
            rpc_client
                .get_balance(owner)
                .await
                .map_err(|err| anyhow!("获取 SOL 余额失败: {err}"))
        },
        fetch_token_accounts(rpc_client, owner, spl_token::id()),
        fetch_token_accounts(rpc_client, owner, spl_token_2022::id()),
    )?;

    let mut tokens: Vec<TokenBalance> = classic.into_iter().chain(extended).collect();
    tokens.sort_by(|a, b| a.mint.to_string().cmp(&b.mint.to_string()));

    Ok(WalletBalances {
        owner: *owner,
        lamports,
        tokens,
    })
}

async fn fetch_token_accounts(
    rpc_client: &Arc<RpcClient>,
    owner: &Pubkey,
    program_id: Pubkey,
) -> Result<Vec<TokenBalance>> {
    let filter = RpcTokenAccountsFilter::ProgramId(program_id.to_string());
    let config = RpcAccountInfoConfig {
        encoding: Some(UiAccountEncoding::JsonParsed),
        commitment: Some(rpc_client.commitment()),
        data_slice: None,
        min_context_slot: None,
    };
    let params = json!([owner.to_string(), filter, config]);
    let response_accounts: RpcResponse<Vec<RpcKeyedAccount>> = rpc_client
        .send(RpcRequest::GetTokenAccountsByOwner, params)
        .await
        .map_err(|err| anyhow!("获取 Token Accounts 失败 ({program_id}): {err}"))?;

    let mut tokens = Vec::with_capacity(response_accounts.value.len());
    for keyed in &response_accounts.value {
        if let Some(balance) = parse_token_account(owner, keyed)? {
            tokens.push(balance);
        }
    }
    Ok(tokens)
}

/// 读取 mint 账户，确定所属 token program 与精度。
pub async fn fetch_mint(rpc_client: &Arc<RpcClient>, mint: &Pubkey) -> Result<MintInfo> {
    let account = rpc_client
        .get_account(mint)
        .await
        .with_context(|| format!("获取 mint 账户失败: {mint}"))?;
    if account.owner != spl_token::id() && account.owner != spl_token_2022::id() {
        return Err(anyhow!("{mint} 不是 token mint (owner = {})", account.owner));
    }
    let state = StateWithExtensions::<Mint>::unpack(&account.data)
        .map_err(|err| anyhow!("解析 mint {mint} 失败: {err}"))?;
    Ok(MintInfo {
        token_program: account.owner,
        decimals: state.base.decimals,
    })
}

fn parse_token_account(owner: &Pubkey, keyed: &RpcKeyedAccount) -> Result<Option<TokenBalance>> {
    let account_pubkey = Pubkey::from_str(&keyed.pubkey).map_err(|err| anyhow!(err))?;
    let UiAccountData::Json(parsed) = &keyed.account.data else {
        debug!(
            target: "wallet::balance",
            account = %account_pubkey,
            "unexpected account data format, skipping"
        );
        return Ok(None);
    };

    let Some(info) = parsed.parsed.get("info") else {
        return Ok(None);
    };
    let owner_field = info.get("owner").and_then(|value| value.as_str());
    if owner_field.map(Pubkey::from_str).transpose()? != Some(*owner) {
        return Ok(None);
    }
    let Some(mint_str) = info.get("mint").and_then(|value| value.as_str()) else {
        return Ok(None);
    };
    let mint = Pubkey::from_str(mint_str).map_err(|err| anyhow!(err))?;
    let token_program =
        Pubkey::from_str(keyed.account.owner.as_str()).map_err(|err| anyhow!(err))?;

    let token_amount = info.get("tokenAmount");
    let amount = token_amount
        .and_then(|ta| ta.get("amount"))
        .and_then(|amount| amount.as_str())
        .and_then(|amount| amount.parse::<u64>().ok())
        .unwrap_or_default();
    let decimals = token_amount
        .and_then(|ta| ta.get("decimals"))
        .and_then(|decimals| decimals.as_u64())
        .unwrap_or_default() as u8;
    let ui_amount = token_amount
        .and_then(|ta| ta.get("uiAmountString"))
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| amount.to_string());

    Ok(Some(TokenBalance {
        mint,
        account: account_pubkey,
        token_program,
        amount,
        decimals,
        ui_amount,
    }))
}
