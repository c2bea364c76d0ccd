use std::collections::HashMap;

use solana_message::{
    VersionedMessage, compiled_instruction::CompiledInstruction, v0::MessageAddressTableLookup,
};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    message::{AddressLookupTableAccount, MessageHeader},
    pubkey::Pubkey,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstructionExtractionError {
    #[error("需要 {count} 个地址查找表，但尚未解析")]
    MissingLookupTables { count: usize },
    #[error("找不到地址查找表 {table}")]
    LookupTableNotFound { table: Pubkey },
    #[error("地址查找表 {table} 索引 {index} 超出范围 (len = {len})")]
    LookupIndexOutOfBounds {
        table: Pubkey,
        index: u8,
        len: usize,
    },
    #[error("指令 program index {index} 超出账户数量 {total}")]
    ProgramIndexOutOfBounds { index: usize, total: usize },
    #[error("指令 account index {index} 超出账户数量 {total}")]
    AccountIndexOutOfBounds { index: usize, total: usize },
}

#[derive(Debug, Clone)]
struct AccountKeyInfo {
    pubkey: Pubkey,
    is_signer: bool,
    is_writable: bool,
}

/// 按原顺序还原消息中的指令，账户的 signer / writable 标记由 header 与查找表段重新推导。
pub fn extract_instructions(
    message: &VersionedMessage,
    resolved_tables: Option<&[AddressLookupTableAccount]>,
) -> Result<Vec<Instruction>, InstructionExtractionError> {
    let account_keys = build_account_keys(message, resolved_tables)?;
    let compiled = match message {
        VersionedMessage::Legacy(legacy) => &legacy.instructions,
        VersionedMessage::V0(v0) => &v0.instructions,
    };

    compiled
        .iter()
        .map(|ix| convert_single_instruction(ix, &account_keys))
        .collect()
}

pub fn lookup_table_addresses(message: &VersionedMessage) -> Vec<Pubkey> {
    match message {
        VersionedMessage::Legacy(_) => Vec::new(),
        VersionedMessage::V0(v0) => v0
            .address_table_lookups
            .iter()
            .map(|lookup| lookup.account_key)
            .collect(),
    }
}

/// 指令中标记为 signer 的账户，按首次出现顺序去重。
pub fn required_signers(instructions: &[Instruction]) -> Vec<Pubkey> {
    let mut signers: Vec<Pubkey> = Vec::new();
    for account in instructions.iter().flat_map(|ix| ix.accounts.iter()) {
        if account.is_signer && !signers.contains(&account.pubkey) {
            signers.push(account.pubkey);
        }
    }
    signers
}

fn build_account_keys(
    message: &VersionedMessage,
    resolved_tables: Option<&[AddressLookupTableAccount]>,
) -> Result<Vec<AccountKeyInfo>, InstructionExtractionError> {
    match message {
        VersionedMessage::Legacy(legacy) => Ok(static_keys(&legacy.account_keys, &legacy.header)),
        VersionedMessage::V0(v0) => {
            let mut infos = static_keys(&v0.account_keys, &v0.header);
            if v0.address_table_lookups.is_empty() {
                return Ok(infos);
            }

            let tables =
                resolved_tables.ok_or(InstructionExtractionError::MissingLookupTables {
                    count: v0.address_table_lookups.len(),
                })?;
            let table_map: HashMap<Pubkey, &AddressLookupTableAccount> =
                tables.iter().map(|table| (table.key, table)).collect();

            // 运行时账户顺序：静态账户 -> 全部可写查找项 -> 全部只读查找项。
            append_lookup_accounts(&mut infos, &v0.address_table_lookups, &table_map, true)?;
            append_lookup_accounts(&mut infos, &v0.address_table_lookups, &table_map, false)?;

            Ok(infos)
        }
    }
}

fn static_keys(keys: &[Pubkey], header: &MessageHeader) -> Vec<AccountKeyInfo> {
    let total = keys.len();
    keys.iter()
        .enumerate()
        .map(|(idx, pubkey)| AccountKeyInfo {
            pubkey: *pubkey,
            is_signer: is_signer(idx, header),
            is_writable: is_writable(idx, header, total),
        })
        .collect()
}

fn append_lookup_accounts(
    infos: &mut Vec<AccountKeyInfo>,
    lookups: &[MessageAddressTableLookup],
    table_map: &HashMap<Pubkey, &AddressLookupTableAccount>,
    writable: bool,
) -> Result<(), InstructionExtractionError> {
    for lookup in lookups {
        let table = table_map.get(&lookup.account_key).copied().ok_or(
            InstructionExtractionError::LookupTableNotFound {
                table: lookup.account_key,
            },
        )?;
        let indexes = if writable {
            &lookup.writable_indexes
        } else {
            &lookup.readonly_indexes
        };
        for index in indexes {
            let address = table.addresses.get(*index as usize).ok_or(
                InstructionExtractionError::LookupIndexOutOfBounds {
                    table: lookup.account_key,
                    index: *index,
                    len: table.addresses.len(),
                },
            )?;
            infos.push(AccountKeyInfo {
                pubkey: *address,
                is_signer: false,
                is_writable: writable,
            });
        }
    }
    Ok(())
}

fn convert_single_instruction(
    ix: &CompiledInstruction,
    account_keys: &[AccountKeyInfo],
) -> Result<Instruction, InstructionExtractionError> {
    let program_index = ix.program_id_index as usize;
    let program = account_keys.get(program_index).ok_or(
        InstructionExtractionError::ProgramIndexOutOfBounds {
            index: program_index,
            total: account_keys.len(),
        },
    )?;

    let mut accounts = Vec::with_capacity(ix.accounts.len());
    for account_index in &ix.accounts {
        let idx = *account_index as usize;
        let key_info =
            account_keys
                .get(idx)
                .ok_or(InstructionExtractionError::AccountIndexOutOfBounds {
                    index: idx,
                    total: account_keys.len(),
                })?;
        accounts.push(AccountMeta {
            pubkey: key_info.pubkey,
            is_signer: key_info.is_signer,
            is_writable: key_info.is_writable,
        });
    }

    Ok(Instruction {
        program_id: program.pubkey,
        accounts,
        data: ix.data.clone(),
    })
}

fn is_signer(index: usize, header: &MessageHeader) -> bool {
    index < header.num_required_signatures as usize
}

fn is_writable(index: usize, header: &MessageHeader, total_keys: usize) -> bool {
    let num_required_signatures = header.num_required_signatures as usize;
    let writable_signed =
        num_required_signatures.saturating_sub(header.num_readonly_signed_accounts as usize);
    if index < num_required_signatures {
        return index < writable_signed;
    }

    let num_unsigned = total_keys.saturating_sub(num_required_signatures);
    let writable_unsigned =
        num_unsigned.saturating_sub(header.num_readonly_unsigned_accounts as usize);
    let unsigned_index = index.saturating_sub(num_required_signatures);
    unsigned_index < writable_unsigned
}
