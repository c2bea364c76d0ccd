use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use solana_commitment_config::CommitmentConfig;
use solana_message::VersionedMessage;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::v0::Message as V0Message;
use solana_sdk::message::{AddressLookupTableAccount, Message};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lander::{Broadcaster, LanderError, SubmitOptions};
use crate::monitoring::events;
use crate::txs::{deserialize_transaction, serialize_transaction};

use super::error::{AssemblyError, AssemblyResult, AssemblyStage};
use super::instructions::{extract_instructions, lookup_table_addresses, required_signers};
use super::remote::{RemoteSigner, RemoteSignerHandle};
use super::signing::{CoSigner, apply_co_signature, missing_signers, unsigned_transaction};
use super::template::{BuilderOutput, TemplateShape, TransactionTemplate};

/// 地址查找表来源，v0 模板在解析指令前需要完整的表内容。
#[async_trait]
pub trait LookupTableSource: Send + Sync {
    async fn lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> anyhow::Result<Vec<AddressLookupTableAccount>>;
}

#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub commitment: CommitmentConfig,
    pub submit: SubmitOptions,
    /// 区块哈希与查找表读取。
    pub read_timeout: Duration,
    pub sign_timeout: Duration,
    pub submit_timeout: Duration,
    pub confirm_timeout: Duration,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::confirmed(),
            submit: SubmitOptions::default(),
            read_timeout: Duration::from_secs(10),
            sign_timeout: Duration::from_secs(15),
            submit_timeout: Duration::from_secs(15),
            confirm_timeout: Duration::from_secs(60),
        }
    }
}

/// 拆解后的模板：形态、按原顺序排列的指令、v0 使用的查找表。
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    pub shape: TemplateShape,
    pub instructions: Vec<Instruction>,
    pub lookup_tables: Vec<AddressLookupTableAccount>,
}

impl PreparedTemplate {
    /// 以新的 fee payer 与区块哈希重新编译消息，形态保持不变。
    pub fn rebuild(&self, fee_payer: &Pubkey, blockhash: Hash) -> AssemblyResult<VersionedMessage> {
        match self.shape {
            TemplateShape::Versioned => {
                let message = V0Message::try_compile(
                    fee_payer,
                    &self.instructions,
                    &self.lookup_tables,
                    blockhash,
                )
                .map_err(|err| AssemblyError::Compile(err.to_string()))?;
                Ok(VersionedMessage::V0(message))
            }
            TemplateShape::Legacy => Ok(VersionedMessage::Legacy(Message::new_with_blockhash(
                &self.instructions,
                Some(fee_payer),
                &blockhash,
            ))),
        }
    }
}

/// 所有签名位均已验签通过、可直接广播的交易。
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub transaction: VersionedTransaction,
    pub shape: TemplateShape,
    pub blockhash: Hash,
    pub co_signature_reapplied: bool,
}

#[derive(Debug, Error)]
#[error(
    "第 {index} 笔交易失败 (共 {total} 笔, 已提交 {}): {source}",
    .submitted.len()
)]
pub struct BatchAssemblyError {
    pub index: usize,
    pub total: usize,
    pub submitted: Vec<Signature>,
    #[source]
    pub source: AssemblyError,
}

/// 双签交易组装器：模板拆解 -> 新区块哈希重建 -> 本地 co-sign -> 远端签名 -> 校验 -> 广播。
///
/// 组装器本身不持有可变状态，可在多个任务间共享并发调用。
pub struct TransactionAssembler {
    signer: Arc<dyn RemoteSigner>,
    broadcaster: Arc<dyn Broadcaster>,
    lookup_tables: Option<Arc<dyn LookupTableSource>>,
    settings: AssemblerSettings,
}

impl TransactionAssembler {
    pub fn new(
        signer: Arc<dyn RemoteSigner>,
        broadcaster: Arc<dyn Broadcaster>,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            signer,
            broadcaster,
            lookup_tables: None,
            settings,
        }
    }

    pub fn with_lookup_tables(mut self, source: Arc<dyn LookupTableSource>) -> Self {
        self.lookup_tables = Some(source);
        self
    }

    pub async fn assemble_and_send(
        &self,
        template: BuilderOutput,
        co_signer: Option<&CoSigner>,
        handle: &RemoteSignerHandle,
    ) -> AssemblyResult<Signature> {
        self.assemble_and_send_with_cancel(template, co_signer, handle, &CancellationToken::new())
            .await
    }

    /// 与 `assemble_and_send` 相同，但 `cancel` 触发后在当前阶段立即放弃。
    /// 广播请求一旦发出便不再响应取消。
    pub async fn assemble_and_send_with_cancel(
        &self,
        template: BuilderOutput,
        co_signer: Option<&CoSigner>,
        handle: &RemoteSignerHandle,
        cancel: &CancellationToken,
    ) -> AssemblyResult<Signature> {
        let started = Instant::now();
        let prepared = match self
            .prepare(template, co_signer.map(CoSigner::pubkey), handle, cancel)
            .await
        {
            Ok(prepared) => prepared,
            Err(err) => {
                events::assembly_failed(None, &handle.wallet_id, &err, started.elapsed());
                return Err(err);
            }
        };

        let outcome = match self.sign(&prepared, co_signer, handle, cancel).await {
            Ok(signed) => self.submit(&signed, cancel).await,
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(signature) => events::assembly_succeeded(
                prepared.shape,
                &handle.wallet_id,
                signature,
                prepared.instructions.len(),
                started.elapsed(),
            ),
            Err(err) => events::assembly_failed(
                Some(prepared.shape),
                &handle.wallet_id,
                err,
                started.elapsed(),
            ),
        }
        outcome
    }

    pub async fn assemble_all(
        &self,
        templates: Vec<BuilderOutput>,
        co_signer: Option<&CoSigner>,
        handle: &RemoteSignerHandle,
    ) -> Result<Vec<Signature>, BatchAssemblyError> {
        self.assemble_all_with_cancel(templates, co_signer, handle, &CancellationToken::new())
            .await
    }

    /// 按顺序逐笔组装并提交；每笔确认后才处理下一笔，遇到首个失败即停止。
    pub async fn assemble_all_with_cancel(
        &self,
        templates: Vec<BuilderOutput>,
        co_signer: Option<&CoSigner>,
        handle: &RemoteSignerHandle,
        cancel: &CancellationToken,
    ) -> Result<Vec<Signature>, BatchAssemblyError> {
        let steps = templates
            .into_iter()
            .map(|template| (template, co_signer))
            .collect();
        self.assemble_steps_with_cancel(steps, handle, cancel).await
    }

    /// 与 `assemble_all_with_cancel` 相同，但每笔模板各自指定 co-signer
    /// （例如仅首笔创建仓位账户）。
    pub async fn assemble_steps_with_cancel(
        &self,
        steps: Vec<(BuilderOutput, Option<&CoSigner>)>,
        handle: &RemoteSignerHandle,
        cancel: &CancellationToken,
    ) -> Result<Vec<Signature>, BatchAssemblyError> {
        let total = steps.len();
        let mut submitted = Vec::with_capacity(total);

        for (index, (template, co_signer)) in steps.into_iter().enumerate() {
            let result = match self
                .assemble_and_send_with_cancel(template, co_signer, handle, cancel)
                .await
            {
                Ok(signature) => {
                    submitted.push(signature);
                    if index + 1 < total {
                        self.confirm(&signature, cancel).await
                    } else {
                        Ok(())
                    }
                }
                Err(err) => Err(err),
            };

            if let Err(source) = result {
                events::batch_halted(index, total, submitted.len(), &source);
                return Err(BatchAssemblyError {
                    index,
                    total,
                    submitted,
                    source,
                });
            }
            info!(
                target: "engine::assembler",
                index,
                total,
                signature = %submitted[index],
                "批量交易进度"
            );
        }

        Ok(submitted)
    }

    /// 步骤 1-2：判定形态、校验可重建性、还原指令并检查签名者集合。不产生任何网络写操作。
    pub async fn prepare(
        &self,
        template: BuilderOutput,
        co_signer: Option<Pubkey>,
        handle: &RemoteSignerHandle,
        cancel: &CancellationToken,
    ) -> AssemblyResult<PreparedTemplate> {
        let source_label = template.label();
        let template = TransactionTemplate::classify(template)?;

        let mut rebuildable = vec![handle.address];
        rebuildable.extend(co_signer);
        template.ensure_rebuildable(&rebuildable)?;

        let message = template.message();
        let table_addresses = lookup_table_addresses(&message);
        let lookup_tables = if table_addresses.is_empty() {
            Vec::new()
        } else {
            self.resolve_lookup_tables(&table_addresses, cancel).await?
        };

        let instructions = extract_instructions(&message, Some(&lookup_tables))?;
        if instructions.is_empty() {
            return Err(AssemblyError::UnsupportedTemplateShape(
                "模板不包含任何指令".to_string(),
            ));
        }

        let signers = required_signers(&instructions);
        if let Some(co_signer) = co_signer {
            if !signers.contains(&co_signer) {
                return Err(AssemblyError::UnexpectedCoSigner(co_signer));
            }
        }
        let unknown: Vec<Pubkey> = signers
            .into_iter()
            .filter(|key| *key != handle.address && Some(*key) != co_signer)
            .collect();
        if !unknown.is_empty() {
            return Err(AssemblyError::MissingSigner { missing: unknown });
        }

        debug!(
            target: "engine::assembler",
            source = source_label,
            shape = template.shape().label(),
            instructions = instructions.len(),
            lookup_tables = lookup_tables.len(),
            template_fee_payer = ?template.fee_payer(),
            "模板已拆解"
        );

        Ok(PreparedTemplate {
            shape: template.shape(),
            instructions,
            lookup_tables,
        })
    }

    /// 步骤 3-8：取新区块哈希、重建、本地签名、远端签名、补签与验签。
    pub async fn sign(
        &self,
        prepared: &PreparedTemplate,
        co_signer: Option<&CoSigner>,
        handle: &RemoteSignerHandle,
        cancel: &CancellationToken,
    ) -> AssemblyResult<SignedTransaction> {
        let blockhash = guarded(
            AssemblyStage::Blockhash,
            self.settings.read_timeout,
            cancel,
            self.broadcaster.latest_blockhash(self.settings.commitment),
        )
        .await?
        .map_err(AssemblyError::Blockhash)?;

        let message = prepared.rebuild(&handle.address, blockhash)?;
        let mut unsigned = unsigned_transaction(message);
        if let Some(co_signer) = co_signer {
            apply_co_signature(&mut unsigned, co_signer)
                .ok_or_else(|| AssemblyError::UnexpectedCoSigner(co_signer.pubkey()))?;
        }
        let payload =
            serialize_transaction(&unsigned).map_err(|err| AssemblyError::Codec(err.to_string()))?;

        let sign_started = Instant::now();
        let signed_bytes = guarded(
            AssemblyStage::RemoteSign,
            self.settings.sign_timeout,
            cancel,
            self.signer.sign_transaction(&handle.wallet_id, &payload),
        )
        .await??;
        events::remote_sign_latency(&handle.wallet_id, sign_started.elapsed());

        let mut signed = deserialize_transaction(&signed_bytes)
            .map_err(|err| AssemblyError::InvalidSignerResponse(err.to_string()))?;
        if signed.message.serialize() != unsigned.message.serialize() {
            return Err(AssemblyError::MessageMismatch);
        }

        let required = signed.message.header().num_required_signatures as usize;
        if signed.signatures.len() != required {
            signed.signatures.resize(required, Signature::default());
        }

        let mut co_signature_reapplied = false;
        if let Some(co_signer) = co_signer {
            if apply_co_signature(&mut signed, co_signer) == Some(true) {
                co_signature_reapplied = true;
                events::co_signature_reapplied(&handle.wallet_id, &co_signer.pubkey());
            }
        }

        let missing = missing_signers(&signed);
        if !missing.is_empty() {
            return Err(AssemblyError::MissingSigner { missing });
        }

        Ok(SignedTransaction {
            transaction: signed,
            shape: prepared.shape,
            blockhash,
            co_signature_reapplied,
        })
    }

    /// 步骤 9：广播并原样返回节点给出的签名。
    pub async fn submit(
        &self,
        signed: &SignedTransaction,
        cancel: &CancellationToken,
    ) -> AssemblyResult<Signature> {
        if cancel.is_cancelled() {
            return Err(AssemblyError::Cancelled {
                stage: AssemblyStage::Submit,
            });
        }

        let timeout = self.settings.submit_timeout;
        let outcome = tokio::time::timeout(
            timeout,
            self.broadcaster
                .submit(&signed.transaction, self.settings.submit),
        )
        .await
        .map_err(|_| {
            warn!(
                target: "engine::assembler",
                blockhash = %signed.blockhash,
                "提交超时，交易可能仍会上链"
            );
            AssemblyError::Timeout {
                stage: AssemblyStage::Submit,
                timeout_ms: timeout.as_millis() as u64,
            }
        })?;
        outcome.map_err(submission_error)
    }

    async fn confirm(&self, signature: &Signature, cancel: &CancellationToken) -> AssemblyResult<()> {
        guarded(
            AssemblyStage::Confirm,
            self.settings.confirm_timeout,
            cancel,
            self.broadcaster.confirm(signature, self.settings.commitment),
        )
        .await?
        .map_err(submission_error)
    }

    async fn resolve_lookup_tables(
        &self,
        addresses: &[Pubkey],
        cancel: &CancellationToken,
    ) -> AssemblyResult<Vec<AddressLookupTableAccount>> {
        let Some(source) = self.lookup_tables.as_ref() else {
            return Err(AssemblyError::LookupTables(format!(
                "模板引用了 {} 个查找表，但未配置查找表来源",
                addresses.len()
            )));
        };
        let tables = guarded(
            AssemblyStage::Prepare,
            self.settings.read_timeout,
            cancel,
            source.lookup_tables(addresses),
        )
        .await?
        .map_err(|err| AssemblyError::LookupTables(format!("{err:#}")))?;

        if let Some(missing) = addresses
            .iter()
            .find(|address| !tables.iter().any(|table| table.key == **address))
        {
            return Err(AssemblyError::LookupTables(format!(
                "查找表 {missing} 不存在或无法解析"
            )));
        }
        Ok(tables)
    }
}

fn submission_error(err: LanderError) -> AssemblyError {
    match err {
        LanderError::Rejected(rejection) => AssemblyError::BroadcastRejected(rejection),
        other => AssemblyError::Submit(other),
    }
}

/// 在超时与取消约束下等待 `fut`；外层错误为超时/取消，内层为调用本身的结果。
async fn guarded<F, T, E>(
    stage: AssemblyStage,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> AssemblyResult<Result<T, E>>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AssemblyError::Cancelled { stage }),
        outcome = tokio::time::timeout(timeout, fut) => outcome.map_err(|_| AssemblyError::Timeout {
            stage,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use solana_sdk::instruction::AccountMeta;
    use solana_sdk::signature::Signer;
    use solana_sdk::transaction::Transaction;

    use crate::engine::testing::{FakeChain, FakeCustody, FixedTables, SignerMode};
    use crate::lander::RejectionKind;
    use crate::txs::encode_base64_transaction;

    fn assembler(custody: &Arc<FakeCustody>, chain: &Arc<FakeChain>) -> TransactionAssembler {
        let settings = AssemblerSettings {
            read_timeout: Duration::from_millis(50),
            ..AssemblerSettings::default()
        };
        TransactionAssembler::new(custody.clone(), chain.clone(), settings)
    }

    /// 创建仓位账户 + 存入流动性，仓位账户需要 co-signer 签名。
    fn position_instructions(payer: &Pubkey, position: &Pubkey) -> Vec<Instruction> {
        let create = solana_system_interface::instruction::create_account(
            payer,
            position,
            1_000_000,
            128,
            &Pubkey::new_unique(),
        );
        let deposit = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[9, 1, 2, 3],
            vec![
                AccountMeta::new(*position, true),
                AccountMeta::new(*payer, true),
                AccountMeta::new(Pubkey::new_unique(), false),
            ],
        );
        vec![create, deposit]
    }

    fn legacy_template(instructions: &[Instruction], payer: &Pubkey) -> BuilderOutput {
        let tx = Transaction::new_with_payer(instructions, Some(payer));
        BuilderOutput::Legacy(tx)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn versioned_template_keeps_instruction_order_with_fresh_blockhash() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let co_signer = CoSigner::generate();

        let mut instructions = position_instructions(&handle.address, &co_signer.pubkey());
        instructions.push(Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[42],
            vec![AccountMeta::new_readonly(Pubkey::new_unique(), false)],
        ));
        let stale = Hash::new_unique();
        let message = V0Message::try_compile(&handle.address, &instructions, &[], stale)
            .expect("compile");
        let template = VersionedTransaction {
            signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
            message: VersionedMessage::V0(message),
        };
        let encoded = encode_base64_transaction(&template).expect("encode");

        let signature = assembler(&custody, &chain)
            .assemble_and_send(BuilderOutput::Encoded(encoded), Some(&co_signer), &handle)
            .await
            .expect("assemble");

        let submitted = chain.submitted.lock();
        assert_eq!(submitted.len(), 1);
        let tx = &submitted[0];
        assert_eq!(tx.signatures[0], signature);
        assert!(matches!(tx.message, VersionedMessage::V0(_)));
        assert_eq!(*tx.message.recent_blockhash(), chain.blockhash);
        assert!(missing_signers(tx).is_empty());

        let rebuilt = extract_instructions(&tx.message, None).expect("extract");
        assert_eq!(rebuilt.len(), instructions.len());
        for (rebuilt, original) in rebuilt.iter().zip(&instructions) {
            assert_eq!(rebuilt.program_id, original.program_id);
            assert_eq!(rebuilt.data, original.data);
            let keys: Vec<Pubkey> = rebuilt.accounts.iter().map(|meta| meta.pubkey).collect();
            let expected: Vec<Pubkey> = original.accounts.iter().map(|meta| meta.pubkey).collect();
            assert_eq!(keys, expected);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn versioned_template_reuses_lookup_tables() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();

        let pool = Pubkey::new_unique();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![pool, Pubkey::new_unique()],
        };
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[5],
            vec![AccountMeta::new(handle.address, true), AccountMeta::new(pool, false)],
        );
        let message =
            V0Message::try_compile(&handle.address, &[ix], &[table.clone()], Hash::new_unique())
                .expect("compile");
        let template = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::V0(message),
        };

        let without_source = assembler(&custody, &chain)
            .assemble_and_send(BuilderOutput::Versioned(template.clone()), None, &handle)
            .await
            .expect_err("no table source");
        assert!(matches!(without_source, AssemblyError::LookupTables(_)));
        assert_eq!(chain.blockhash_calls.load(Ordering::SeqCst), 0);

        assembler(&custody, &chain)
            .with_lookup_tables(Arc::new(FixedTables(vec![table.clone()])))
            .assemble_and_send(BuilderOutput::Versioned(template), None, &handle)
            .await
            .expect("assemble");

        let submitted = chain.submitted.lock();
        let VersionedMessage::V0(message) = &submitted[0].message else {
            panic!("expected v0 message");
        };
        assert_eq!(message.address_table_lookups.len(), 1);
        assert_eq!(message.address_table_lookups[0].account_key, table.key);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unsigned_remote_payload_is_missing_signer() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Unsigned));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let co_signer = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &co_signer.pubkey());

        let err = assembler(&custody, &chain)
            .assemble_and_send(
                legacy_template(&instructions, &handle.address),
                Some(&co_signer),
                &handle,
            )
            .await
            .expect_err("unsigned");

        match err {
            AssemblyError::MissingSigner { missing } => assert_eq!(missing, vec![handle.address]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn immutable_template_never_reaches_network() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();

        let err = assembler(&custody, &chain)
            .assemble_and_send(BuilderOutput::Sealed(vec![1, 2, 3, 4]), None, &handle)
            .await
            .expect_err("sealed");

        assert!(matches!(err, AssemblyError::ImmutableTemplate(_)));
        assert_eq!(err.class(), crate::engine::ErrorClass::InvalidInput);
        assert_eq!(chain.blockhash_calls.load(Ordering::SeqCst), 0);
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(custody.calls(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dropped_co_signature_is_reapplied() {
        let custody = Arc::new(FakeCustody::new(SignerMode::DropCoSignature));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let co_signer = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &co_signer.pubkey());
        let assembler = assembler(&custody, &chain);

        let prepared = assembler
            .prepare(
                legacy_template(&instructions, &handle.address),
                Some(co_signer.pubkey()),
                &handle,
                &CancellationToken::new(),
            )
            .await
            .expect("prepare");
        assert_eq!(prepared.shape, TemplateShape::Legacy);

        let signed = assembler
            .sign(&prepared, Some(&co_signer), &handle, &CancellationToken::new())
            .await
            .expect("sign");
        assert!(signed.co_signature_reapplied);
        assert!(missing_signers(&signed.transaction).is_empty());

        let signature = assembler
            .submit(&signed, &CancellationToken::new())
            .await
            .expect("submit");
        assert_eq!(signature, signed.transaction.signatures[0]);
        assert_eq!(chain.submitted.lock().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blockhash_failure_skips_remote_signer() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let handle = custody.handle();
        let co_signer = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &co_signer.pubkey());

        let failing = Arc::new(FakeChain {
            fail_blockhash: true,
            ..FakeChain::new()
        });
        let err = assembler(&custody, &failing)
            .assemble_and_send(
                legacy_template(&instructions, &handle.address),
                Some(&co_signer),
                &handle,
            )
            .await
            .expect_err("blockhash failure");
        assert!(matches!(err, AssemblyError::Blockhash(_)));
        assert!(err.is_retryable());

        let slow = Arc::new(FakeChain {
            blockhash_delay: Some(Duration::from_millis(500)),
            ..FakeChain::new()
        });
        let err = assembler(&custody, &slow)
            .assemble_and_send(
                legacy_template(&instructions, &handle.address),
                Some(&co_signer),
                &handle,
            )
            .await
            .expect_err("blockhash timeout");
        assert!(matches!(
            err,
            AssemblyError::Timeout {
                stage: AssemblyStage::Blockhash,
                ..
            }
        ));

        assert_eq!(custody.calls(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn tampered_remote_message_is_rejected() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Tamper));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let co_signer = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &co_signer.pubkey());

        let err = assembler(&custody, &chain)
            .assemble_and_send(
                legacy_template(&instructions, &handle.address),
                Some(&co_signer),
                &handle,
            )
            .await
            .expect_err("tampered");
        assert!(matches!(err, AssemblyError::MessageMismatch));
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn signer_set_is_checked_before_network() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let expected = CoSigner::generate();
        let stranger = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &expected.pubkey());

        let err = assembler(&custody, &chain)
            .assemble_and_send(
                legacy_template(&instructions, &handle.address),
                Some(&stranger),
                &handle,
            )
            .await
            .expect_err("stranger");
        assert!(matches!(err, AssemblyError::UnexpectedCoSigner(key) if key == stranger.pubkey()));

        let err = assembler(&custody, &chain)
            .assemble_and_send(legacy_template(&instructions, &handle.address), None, &handle)
            .await
            .expect_err("co-signer absent");
        assert!(
            matches!(err, AssemblyError::MissingSigner { ref missing } if missing == &vec![expected.pubkey()])
        );
        assert_eq!(chain.blockhash_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_token_stops_before_signing() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let co_signer = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &co_signer.pubkey());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = assembler(&custody, &chain)
            .assemble_and_send_with_cancel(
                legacy_template(&instructions, &handle.address),
                Some(&co_signer),
                &handle,
                &cancel,
            )
            .await
            .expect_err("cancelled");
        assert!(matches!(err, AssemblyError::Cancelled { .. }));
        assert_eq!(custody.calls(), 0);
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn remote_sign_timeout_never_submits() {
        let custody = Arc::new(
            FakeCustody::new(SignerMode::Honest).with_sign_delay(Duration::from_millis(500)),
        );
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let co_signer = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &co_signer.pubkey());
        let settings = AssemblerSettings {
            sign_timeout: Duration::from_millis(50),
            ..AssemblerSettings::default()
        };

        let err = TransactionAssembler::new(custody.clone(), chain.clone(), settings)
            .assemble_and_send(
                legacy_template(&instructions, &handle.address),
                Some(&co_signer),
                &handle,
            )
            .await
            .expect_err("sign timeout");
        assert!(matches!(
            err,
            AssemblyError::Timeout {
                stage: AssemblyStage::RemoteSign,
                timeout_ms: 50,
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(custody.calls(), 1);
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn submit_timeout_is_reported_for_submit_stage() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain {
            submit_delay: Some(Duration::from_millis(500)),
            ..FakeChain::new()
        });
        let handle = custody.handle();
        let co_signer = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &co_signer.pubkey());
        let settings = AssemblerSettings {
            submit_timeout: Duration::from_millis(50),
            ..AssemblerSettings::default()
        };

        let err = TransactionAssembler::new(custody.clone(), chain.clone(), settings)
            .assemble_and_send(
                legacy_template(&instructions, &handle.address),
                Some(&co_signer),
                &handle,
            )
            .await
            .expect_err("submit timeout");
        assert!(matches!(
            err,
            AssemblyError::Timeout {
                stage: AssemblyStage::Submit,
                timeout_ms: 50,
            }
        ));
        assert_eq!(custody.calls(), 1);
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 1);
        assert!(chain.submitted.lock().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancel_during_remote_sign_submits_nothing() {
        let custody = Arc::new(
            FakeCustody::new(SignerMode::Honest).with_sign_delay(Duration::from_millis(500)),
        );
        let chain = Arc::new(FakeChain::new());
        let handle = custody.handle();
        let co_signer = CoSigner::generate();
        let instructions = position_instructions(&handle.address, &co_signer.pubkey());
        let assembler = assembler(&custody, &chain);
        let cancel = CancellationToken::new();

        let (outcome, ()) = tokio::join!(
            assembler.assemble_and_send_with_cancel(
                legacy_template(&instructions, &handle.address),
                Some(&co_signer),
                &handle,
                &cancel,
            ),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        );
        let err = outcome.expect_err("cancelled while signing");
        assert!(matches!(
            err,
            AssemblyError::Cancelled {
                stage: AssemblyStage::RemoteSign
            }
        ));
        assert_eq!(custody.calls(), 1);
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejection_surfaces_broadcast_reason() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain {
            reject_at: Some(0),
            ..FakeChain::new()
        });
        let handle = custody.handle();
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1],
            vec![AccountMeta::new(handle.address, true)],
        );

        let err = assembler(&custody, &chain)
            .assemble_and_send(legacy_template(&[ix], &handle.address), None, &handle)
            .await
            .expect_err("rejected");
        match err {
            AssemblyError::BroadcastRejected(rejection) => {
                assert_eq!(rejection.kind, RejectionKind::InsufficientFunds);
                assert_eq!(rejection.reason, "insufficient funds for fee");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn batch_stops_at_first_failure() {
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let handle = custody.handle();
        let templates = || {
            (0u8..3)
                .map(|step| {
                    let ix = Instruction::new_with_bytes(
                        Pubkey::new_unique(),
                        &[step],
                        vec![AccountMeta::new(handle.address, true)],
                    );
                    legacy_template(&[ix], &handle.address)
                })
                .collect::<Vec<_>>()
        };

        let chain = Arc::new(FakeChain::new());
        let signatures = assembler(&custody, &chain)
            .assemble_all(templates(), None, &handle)
            .await
            .expect("batch");
        assert_eq!(signatures.len(), 3);
        assert_eq!(chain.confirmed.lock().as_slice(), &signatures[..2]);

        let chain = Arc::new(FakeChain {
            reject_at: Some(1),
            ..FakeChain::new()
        });
        let err = assembler(&custody, &chain)
            .assemble_all(templates(), None, &handle)
            .await
            .expect_err("second fails");
        assert_eq!(err.index, 1);
        assert_eq!(err.total, 3);
        assert_eq!(err.submitted.len(), 1);
        assert!(matches!(err.source, AssemblyError::BroadcastRejected(_)));
        assert_eq!(chain.submitted.lock().len(), 1);
    }
}
