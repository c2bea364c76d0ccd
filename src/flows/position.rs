//! 集中流动性仓位：开仓（双签）、平仓（多笔顺序提交）、领取手续费。

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::positions::{
    FeeClaim, MAX_RANGE_BINS, OpenPositionRequest, PoolInfo, PositionApiError, PositionBuilder, PositionRequest,
    StrategyKind,
};
use crate::cache::PoolCache;
use crate::engine::{BuilderOutput, CoSigner, RemoteSignerHandle, TransactionAssembler};

use super::FlowError;

#[derive(Debug, Clone, Copy)]
pub struct OpenPositionParams {
    pub pool: Pubkey,
    pub amount_x: u64,
    pub amount_y: u64,
    pub strategy: StrategyKind,
    /// 为空时使用配置的默认宽度。
    pub range_bins: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PositionReceipt {
    pub position: Pubkey,
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Vec<Signature>),
    NoFeesAvailable,
}

pub struct PositionFlows {
    builder: Arc<dyn PositionBuilder>,
    pools: Arc<PoolCache<PoolInfo>>,
    default_range_bins: u32,
}

impl PositionFlows {
    pub fn new(
        builder: Arc<dyn PositionBuilder>,
        pools: Arc<PoolCache<PoolInfo>>,
        default_range_bins: u32,
    ) -> Self {
        Self {
            builder,
            pools,
            default_range_bins: default_range_bins.max(1),
        }
    }

    pub async fn pool(&self, pool: &Pubkey) -> Result<Arc<PoolInfo>, FlowError> {
        let builder = self.builder.as_ref();
        self.pools
            .load_or_fetch(*pool, move |key| async move {
                builder.pool(&key).await.map_err(anyhow::Error::from)
            })
            .await
            .map_err(|err| match err.downcast::<PositionApiError>() {
                Ok(api) => FlowError::Positions(api),
                Err(other) => FlowError::Chain(format!("{other:#}")),
            })
    }

    /// 新仓位账户由本地一次性 keypair 创建，首笔模板需其 co-sign；
    /// keypair 随本函数返回被销毁。
    pub async fn open(
        &self,
        assembler: &TransactionAssembler,
        handle: &RemoteSignerHandle,
        params: &OpenPositionParams,
    ) -> Result<PositionReceipt, FlowError> {
        if params.amount_x == 0 && params.amount_y == 0 {
            return Err(FlowError::InvalidInput("存入数量不能全部为 0".into()));
        }
        let range_bins = params.range_bins.unwrap_or(self.default_range_bins);
        if range_bins == 0 || range_bins > MAX_RANGE_BINS {
            return Err(FlowError::InvalidInput(format!(
                "bin 区间宽度 {range_bins} 超出范围 1..={MAX_RANGE_BINS}"
            )));
        }
        let pool = self.pool(&params.pool).await?;
        let (min_bin_id, max_bin_id) = pool.bin_range(range_bins).ok_or_else(|| {
            FlowError::InvalidInput(format!(
                "活跃 bin {} 附近无法容纳宽度 {range_bins} 的区间",
                pool.active_bin_id
            ))
        })?;

        let co_signer = CoSigner::generate();
        let position = co_signer.pubkey();
        let request = OpenPositionRequest {
            pool: params.pool,
            owner: handle.address,
            position,
            amount_x: params.amount_x,
            amount_y: params.amount_y,
            strategy: params.strategy,
            min_bin_id,
            max_bin_id,
        };
        let templates = non_empty(self.builder.open_position(&request).await?, "open")?;
        let steps = templates
            .into_iter()
            .enumerate()
            .map(|(index, template)| (template, (index == 0).then_some(&co_signer)))
            .collect();

        let outcome = assembler
            .assemble_steps_with_cancel(steps, handle, &CancellationToken::new())
            .await;
        self.pools.invalidate(&params.pool, "open_position").await;
        let signatures = outcome?;

        info!(
            target: "flows::position",
            wallet = %handle,
            pool = %params.pool,
            position = %position,
            min_bin_id,
            max_bin_id,
            transactions = signatures.len(),
            "仓位已创建"
        );
        Ok(PositionReceipt {
            position,
            signatures,
        })
    }

    /// 全额撤出并关闭仓位，多笔模板按序提交并逐笔确认。
    pub async fn close(
        &self,
        assembler: &TransactionAssembler,
        handle: &RemoteSignerHandle,
        pool: &Pubkey,
        position: &Pubkey,
    ) -> Result<PositionReceipt, FlowError> {
        let request = PositionRequest {
            pool: *pool,
            owner: handle.address,
            position: *position,
        };
        let templates = non_empty(self.builder.close_position(&request).await?, "close")?;
        let outcome = assembler.assemble_all(templates, None, handle).await;
        self.pools.invalidate(pool, "close_position").await;
        let signatures = outcome?;

        info!(
            target: "flows::position",
            wallet = %handle,
            pool = %pool,
            position = %position,
            transactions = signatures.len(),
            "仓位已关闭"
        );
        Ok(PositionReceipt {
            position: *position,
            signatures,
        })
    }

    pub async fn claim(
        &self,
        assembler: &TransactionAssembler,
        handle: &RemoteSignerHandle,
        pool: &Pubkey,
        position: &Pubkey,
    ) -> Result<ClaimOutcome, FlowError> {
        let request = PositionRequest {
            pool: *pool,
            owner: handle.address,
            position: *position,
        };
        let templates = match self.builder.claim_fees(&request).await? {
            FeeClaim::Claimable(templates) => templates,
            FeeClaim::NoFeesAvailable => {
                info!(
                    target: "flows::position",
                    position = %position,
                    "无可领取手续费"
                );
                return Ok(ClaimOutcome::NoFeesAvailable);
            }
        };
        let signatures = assembler.assemble_all(templates, None, handle).await?;
        info!(
            target: "flows::position",
            wallet = %handle,
            position = %position,
            transactions = signatures.len(),
            "手续费已领取"
        );
        Ok(ClaimOutcome::Claimed(signatures))
    }
}

fn non_empty(
    templates: Vec<BuilderOutput>,
    operation: &'static str,
) -> Result<Vec<BuilderOutput>, FlowError> {
    if templates.is_empty() {
        warn!(
            target: "flows::position",
            operation,
            "仓位服务未返回任何交易模板"
        );
        return Err(FlowError::Positions(PositionApiError::Schema(format!(
            "{operation} 未返回交易模板"
        ))));
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use solana_sdk::instruction::{AccountMeta, Instruction};
    use solana_sdk::transaction::Transaction;

    use super::*;
    use crate::engine::testing::{FakeChain, FakeCustody, SignerMode};
    use crate::engine::{AssemblerSettings, AssemblyError};

    struct FakeBuilder {
        pool: PoolInfo,
        pool_calls: AtomicUsize,
        open_requests: Mutex<Vec<OpenPositionRequest>>,
        close_templates: usize,
        claimable: bool,
    }

    impl FakeBuilder {
        fn new() -> Self {
            Self {
                pool: PoolInfo {
                    address: Pubkey::new_unique(),
                    token_x_mint: Pubkey::new_unique(),
                    token_y_mint: Pubkey::new_unique(),
                    bin_step: 10,
                    active_bin_id: 100,
                },
                pool_calls: AtomicUsize::new(0),
                open_requests: Mutex::new(Vec::new()),
                close_templates: 2,
                claimable: false,
            }
        }
    }

    fn single_ix(payer: &Pubkey, extra_signer: Option<&Pubkey>) -> BuilderOutput {
        let mut accounts = vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(Pubkey::new_unique(), false),
        ];
        if let Some(signer) = extra_signer {
            accounts.push(AccountMeta::new(*signer, true));
        }
        let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &[1, 2], accounts);
        BuilderOutput::Legacy(Transaction::new_with_payer(&[ix], Some(payer)))
    }

    #[async_trait]
    impl PositionBuilder for FakeBuilder {
        async fn pool(&self, _pool: &Pubkey) -> Result<PoolInfo, PositionApiError> {
            self.pool_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pool.clone())
        }

        async fn open_position(
            &self,
            request: &OpenPositionRequest,
        ) -> Result<Vec<BuilderOutput>, PositionApiError> {
            self.open_requests.lock().push(request.clone());
            let create = solana_system_interface::instruction::create_account(
                &request.owner,
                &request.position,
                1_000_000,
                376,
                &Pubkey::new_unique(),
            );
            let deposit = Instruction::new_with_bytes(
                Pubkey::new_unique(),
                &[3, 3],
                vec![
                    AccountMeta::new(request.position, true),
                    AccountMeta::new(request.owner, true),
                ],
            );
            Ok(vec![
                BuilderOutput::Legacy(Transaction::new_with_payer(
                    &[create, deposit],
                    Some(&request.owner),
                )),
                single_ix(&request.owner, None),
            ])
        }

        async fn close_position(
            &self,
            request: &PositionRequest,
        ) -> Result<Vec<BuilderOutput>, PositionApiError> {
            Ok((0..self.close_templates)
                .map(|_| single_ix(&request.owner, None))
                .collect())
        }

        async fn claim_fees(&self, request: &PositionRequest) -> Result<FeeClaim, PositionApiError> {
            if self.claimable {
                Ok(FeeClaim::Claimable(vec![single_ix(&request.owner, None)]))
            } else {
                Ok(FeeClaim::NoFeesAvailable)
            }
        }
    }

    fn setup(
        builder: FakeBuilder,
    ) -> (
        Arc<FakeBuilder>,
        Arc<FakeCustody>,
        Arc<FakeChain>,
        TransactionAssembler,
        PositionFlows,
    ) {
        let builder = Arc::new(builder);
        let custody = Arc::new(FakeCustody::new(SignerMode::Honest));
        let chain = Arc::new(FakeChain::new());
        let assembler =
            TransactionAssembler::new(custody.clone(), chain.clone(), AssemblerSettings::default());
        let flows = PositionFlows::new(builder.clone(), Arc::new(PoolCache::new(None)), 10);
        (builder, custody, chain, assembler, flows)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn open_co_signs_only_the_position_template() {
        let (builder, custody, chain, assembler, flows) = setup(FakeBuilder::new());
        let handle = custody.handle();
        let params = OpenPositionParams {
            pool: builder.pool.address,
            amount_x: 1_000,
            amount_y: 0,
            strategy: StrategyKind::Spot,
            range_bins: None,
        };

        let receipt = flows.open(&assembler, &handle, &params).await.expect("open");
        assert_eq!(receipt.signatures.len(), 2);

        let requests = builder.open_requests.lock();
        assert_eq!(requests[0].position, receipt.position);
        assert_eq!((requests[0].min_bin_id, requests[0].max_bin_id), (95, 104));

        let submitted = chain.submitted.lock();
        assert_eq!(submitted[0].signatures.len(), 2);
        assert_eq!(submitted[1].signatures.len(), 1);
        assert!(
            submitted[0]
                .message
                .static_account_keys()
                .contains(&receipt.position)
        );
        assert_eq!(chain.confirmed.lock().as_slice(), &receipt.signatures[..1]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn open_rejects_out_of_bounds_range() {
        let (builder, custody, chain, assembler, flows) = setup(FakeBuilder::new());
        let handle = custody.handle();
        for range_bins in [0, MAX_RANGE_BINS + 1, 2_147_483_648, 3_000_000_000] {
            let params = OpenPositionParams {
                pool: builder.pool.address,
                amount_x: 1_000,
                amount_y: 0,
                strategy: StrategyKind::Spot,
                range_bins: Some(range_bins),
            };
            let err = flows
                .open(&assembler, &handle, &params)
                .await
                .expect_err("range out of bounds");
            assert!(matches!(err, FlowError::InvalidInput(_)), "{range_bins}: {err}");
        }
        assert_eq!(builder.pool_calls.load(Ordering::SeqCst), 0);
        assert!(builder.open_requests.lock().is_empty());
        assert!(chain.submitted.lock().is_empty());

        let params = OpenPositionParams {
            pool: builder.pool.address,
            amount_x: 1_000,
            amount_y: 0,
            strategy: StrategyKind::Spot,
            range_bins: Some(MAX_RANGE_BINS),
        };
        flows.open(&assembler, &handle, &params).await.expect("widest range");
        let requests = builder.open_requests.lock();
        assert_eq!((requests[0].min_bin_id, requests[0].max_bin_id), (-600, 799));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pool_lookups_are_cached_until_position_changes() {
        let (builder, _custody, _chain, _assembler, flows) = setup(FakeBuilder::new());
        let pool = builder.pool.address;
        flows.pool(&pool).await.expect("first");
        flows.pool(&pool).await.expect("second");
        assert_eq!(builder.pool_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn open_invalidates_cached_pool() {
        let (builder, custody, _chain, assembler, flows) = setup(FakeBuilder::new());
        let params = OpenPositionParams {
            pool: builder.pool.address,
            amount_x: 1,
            amount_y: 1,
            strategy: StrategyKind::Curve,
            range_bins: Some(4),
        };
        flows
            .open(&assembler, &custody.handle(), &params)
            .await
            .expect("open");
        flows.pool(&builder.pool.address).await.expect("refetch");
        assert_eq!(builder.pool_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_submits_every_template_in_order() {
        let mut fake = FakeBuilder::new();
        fake.close_templates = 3;
        let (builder, custody, chain, assembler, flows) = setup(fake);
        let position = Pubkey::new_unique();
        let receipt = flows
            .close(&assembler, &custody.handle(), &builder.pool.address, &position)
            .await
            .expect("close");
        assert_eq!(receipt.signatures.len(), 3);
        assert_eq!(chain.submitted.lock().len(), 3);
        assert_eq!(chain.confirmed.lock().len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn claim_without_fees_submits_nothing() {
        let (builder, custody, chain, assembler, flows) = setup(FakeBuilder::new());
        let outcome = flows
            .claim(
                &assembler,
                &custody.handle(),
                &builder.pool.address,
                &Pubkey::new_unique(),
            )
            .await
            .expect("claim");
        assert!(matches!(outcome, ClaimOutcome::NoFeesAvailable));
        assert_eq!(custody.calls(), 0);
        assert!(chain.submitted.lock().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_failure_reports_batch_index() {
        let mut fake = FakeBuilder::new();
        fake.close_templates = 2;
        let (builder, custody, _chain, _assembler, flows) = setup(fake);
        let chain = Arc::new(FakeChain {
            reject_at: Some(1),
            ..FakeChain::new()
        });
        let assembler =
            TransactionAssembler::new(custody.clone(), chain.clone(), AssemblerSettings::default());
        let err = flows
            .close(
                &assembler,
                &custody.handle(),
                &builder.pool.address,
                &Pubkey::new_unique(),
            )
            .await
            .expect_err("rejected");
        match err {
            FlowError::Batch(batch) => {
                assert_eq!(batch.index, 1);
                assert_eq!(batch.submitted.len(), 1);
                assert!(matches!(batch.source, AssemblyError::BroadcastRejected(_)));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
