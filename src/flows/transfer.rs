use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use solana_system_interface::instruction as system_instruction;
use tracing::info;

use crate::engine::{BuilderOutput, RemoteSignerHandle, TransactionAssembler};
use crate::wallet::{MintInfo, fetch_mint};

use super::FlowError;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub recipient: Pubkey,
    /// 人类可读数量；SOL 以 SOL 计，SPL 以 mint 精度计。
    pub amount: Decimal,
    /// 为空时转原生 SOL。
    pub mint: Option<Pubkey>,
    pub compute_unit_price_micro_lamports: u64,
}

/// 将 SOL 数量转换为 lamports。
pub fn decimal_sol_to_lamports(amount: &Decimal) -> Result<u64, FlowError> {
    decimal_to_raw_amount(amount, 9)
}

/// 按 mint 精度把十进制数量换算为链上整数数量，超出精度的小数视为错误。
pub fn decimal_to_raw_amount(amount: &Decimal, decimals: u8) -> Result<u64, FlowError> {
    if amount <= &Decimal::ZERO {
        return Err(FlowError::InvalidInput("金额必须大于 0".into()));
    }
    let scale = 10u64
        .checked_pow(u32::from(decimals))
        .ok_or_else(|| FlowError::InvalidInput(format!("精度 {decimals} 超出范围")))?;
    let scaled = amount
        .checked_mul(Decimal::from(scale))
        .ok_or_else(|| FlowError::InvalidInput("金额超出可表示范围".into()))?;
    if !scaled.fract().is_zero() {
        return Err(FlowError::InvalidInput(format!(
            "金额最多支持 {decimals} 位小数"
        )));
    }
    scaled
        .to_u64()
        .ok_or_else(|| FlowError::InvalidInput("金额超过 u64 最大值".into()))
}

/// 原生 SOL 转账模板，fee payer 为托管钱包。
pub fn sol_transfer_template(
    payer: &Pubkey,
    recipient: &Pubkey,
    lamports: u64,
    compute_unit_price: u64,
) -> BuilderOutput {
    let mut instructions = Vec::with_capacity(2);
    instructions.push(system_instruction::transfer(payer, recipient, lamports));
    maybe_insert_compute_unit_price(&mut instructions, compute_unit_price);
    BuilderOutput::Legacy(Transaction::new_with_payer(&instructions, Some(payer)))
}

/// SPL 转账模板：幂等创建收款 ATA，再 `transfer_checked`。
pub fn token_transfer_template(
    payer: &Pubkey,
    recipient: &Pubkey,
    mint: &Pubkey,
    mint_info: MintInfo,
    amount: u64,
    compute_unit_price: u64,
) -> Result<BuilderOutput, FlowError> {
    let source = spl_associated_token_account::get_associated_token_address_with_program_id(
        payer,
        mint,
        &mint_info.token_program,
    );
    let destination = spl_associated_token_account::get_associated_token_address_with_program_id(
        recipient,
        mint,
        &mint_info.token_program,
    );

    let mut instructions = Vec::with_capacity(3);
    instructions.push(create_associated_token_account_idempotent(
        payer,
        recipient,
        &destination,
        mint,
        &mint_info.token_program,
    ));
    instructions.push(
        spl_token_2022::instruction::transfer_checked(
            &mint_info.token_program,
            &source,
            mint,
            &destination,
            payer,
            &[],
            amount,
            mint_info.decimals,
        )
        .map_err(|err| FlowError::InvalidInput(format!("构造 transfer_checked 失败: {err}")))?,
    );
    maybe_insert_compute_unit_price(&mut instructions, compute_unit_price);
    Ok(BuilderOutput::Legacy(Transaction::new_with_payer(
        &instructions,
        Some(payer),
    )))
}

/// SOL 或 SPL 转账，单签（无 co-signer）。
pub async fn transfer(
    assembler: &TransactionAssembler,
    rpc_client: &Arc<RpcClient>,
    handle: &RemoteSignerHandle,
    request: &TransferRequest,
) -> Result<Signature, FlowError> {
    if request.recipient == handle.address {
        return Err(FlowError::InvalidInput("收款地址与钱包地址相同".into()));
    }
    let template = match request.mint {
        None => {
            let lamports = decimal_sol_to_lamports(&request.amount)?;
            sol_transfer_template(
                &handle.address,
                &request.recipient,
                lamports,
                request.compute_unit_price_micro_lamports,
            )
        }
        Some(mint) => {
            let mint_info = fetch_mint(rpc_client, &mint)
                .await
                .map_err(|err| FlowError::Chain(format!("{err:#}")))?;
            let amount = decimal_to_raw_amount(&request.amount, mint_info.decimals)?;
            token_transfer_template(
                &handle.address,
                &request.recipient,
                &mint,
                mint_info,
                amount,
                request.compute_unit_price_micro_lamports,
            )?
        }
    };

    let signature = assembler.assemble_and_send(template, None, handle).await?;
    info!(
        target: "flows::transfer",
        wallet = %handle,
        recipient = %request.recipient,
        mint = ?request.mint,
        amount = %request.amount,
        signature = %signature,
        "转账已提交"
    );
    Ok(signature)
}

fn create_associated_token_account_idempotent(
    payer: &Pubkey,
    owner: &Pubkey,
    associated: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: spl_associated_token_account::id(),
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(*associated, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(solana_system_interface::program::ID, false),
            AccountMeta::new_readonly(*token_program, false),
        ],
        data: vec![1u8],
    }
}

fn maybe_insert_compute_unit_price(instructions: &mut Vec<Instruction>, price: u64) {
    if price == 0 {
        return;
    }
    instructions.insert(0, ComputeBudgetInstruction::set_compute_unit_price(price));
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::engine::AssemblerSettings;
    use crate::engine::testing::{FakeChain, FakeCustody, SignerMode};

    fn legacy_instructions(output: &BuilderOutput) -> &Transaction {
        match output {
            BuilderOutput::Legacy(tx) => tx,
            other => panic!("unexpected template {}", other.label()),
        }
    }

    #[test]
    fn decimal_amounts_respect_precision() {
        let amount = Decimal::from_str("1.5").expect("decimal");
        assert_eq!(decimal_sol_to_lamports(&amount).expect("lamports"), 1_500_000_000);
        assert_eq!(decimal_to_raw_amount(&amount, 6).expect("raw"), 1_500_000);

        let too_fine = Decimal::from_str("0.0000001").expect("decimal");
        assert!(matches!(
            decimal_to_raw_amount(&too_fine, 6),
            Err(FlowError::InvalidInput(_))
        ));
        assert!(decimal_sol_to_lamports(&Decimal::ZERO).is_err());
    }

    #[test]
    fn sol_template_prepends_compute_price() {
        let payer = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let output = sol_transfer_template(&payer, &recipient, 10, 5_000);
        let tx = legacy_instructions(&output);
        assert_eq!(tx.message.account_keys[0], payer);
        assert_eq!(tx.message.instructions.len(), 2);
        // SetComputeUnitPrice
        assert_eq!(tx.message.instructions[0].data[0], 3);
        let transfer_program =
            tx.message.account_keys[tx.message.instructions[1].program_id_index as usize];
        assert_eq!(transfer_program, solana_system_interface::program::ID);
    }

    #[test]
    fn token_template_creates_recipient_ata_first() {
        let payer = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let info = MintInfo {
            token_program: spl_token::id(),
            decimals: 6,
        };
        let output =
            token_transfer_template(&payer, &recipient, &mint, info, 1_000, 0).expect("template");
        let tx = legacy_instructions(&output);
        let programs: Vec<Pubkey> = tx
            .message
            .instructions
            .iter()
            .map(|ix| tx.message.account_keys[ix.program_id_index as usize])
            .collect();
        assert_eq!(programs, vec![spl_associated_token_account::id(), spl_token::id()]);
        // TransferChecked
        assert_eq!(tx.message.instructions[1].data[0], 12);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sol_transfer_is_signed_by_custody_and_submitted() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let assembler =
            TransactionAssembler::new(custody.clone(), chain.clone(), AssemblerSettings::default());
        let rpc = Arc::new(RpcClient::new_mock("succeeds".to_string()));

        let request = TransferRequest {
            recipient: Pubkey::new_unique(),
            amount: Decimal::from_str("0.25").expect("decimal"),
            mint: None,
            compute_unit_price_micro_lamports: 0,
        };
        let signature = transfer(&assembler, &rpc, &handle, &request)
            .await
            .expect("transfer");

        assert_eq!(custody.calls(), 1);
        let submitted = chain.submitted.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].signatures[0], signature);
        assert_eq!(*submitted[0].message.recent_blockhash(), chain.blockhash);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn self_transfer_is_rejected_before_assembly() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let assembler =
            TransactionAssembler::new(custody.clone(), chain.clone(), AssemblerSettings::default());
        let rpc = Arc::new(RpcClient::new_mock("succeeds".to_string()));

        let request = TransferRequest {
            recipient: handle.address,
            amount: Decimal::ONE,
            mint: None,
            compute_unit_price_micro_lamports: 0,
        };
        let err = transfer(&assembler, &rpc, &handle, &request)
            .await
            .expect_err("self transfer");
        assert!(matches!(err, FlowError::InvalidInput(_)));
        assert_eq!(custody.calls(), 0);
    }
}
