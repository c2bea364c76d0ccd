//! 组装流程测试用的进程内假托管服务与假链。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::message::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;

use crate::lander::{Broadcaster, LanderError, Rejection, RejectionKind, SubmitOptions};
use crate::txs::{deserialize_transaction, serialize_transaction};

use super::assembler::LookupTableSource;
use super::remote::{RemoteSigner, RemoteSignerError, RemoteSignerHandle};

#[derive(Clone, Copy)]
pub(crate) enum SignerMode {
    Honest,
    DropCoSignature,
    Unsigned,
    Tamper,
}

pub(crate) struct FakeCustody {
    pub(crate) wallet: Keypair,
    mode: SignerMode,
    sign_delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeCustody {
    pub(crate) fn new(mode: SignerMode) -> Self {
        Self {
            wallet: Keypair::new(),
            mode,
            sign_delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_sign_delay(mut self, delay: Duration) -> Self {
        self.sign_delay = Some(delay);
        self
    }

    pub(crate) fn handle(&self) -> RemoteSignerHandle {
        RemoteSignerHandle::new("wallet-1", self.wallet.pubkey())
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSigner for FakeCustody {
    async fn sign_transaction(
        &self,
        wallet_id: &str,
        transaction: &[u8],
    ) -> Result<Vec<u8>, RemoteSignerError> {
        assert_eq!(wallet_id, "wallet-1");
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.sign_delay {
            tokio::time::sleep(delay).await;
        }
        let mut tx = deserialize_transaction(transaction)
            .map_err(|err| RemoteSignerError::MalformedTransaction(err.to_string()))?;
        match self.mode {
            SignerMode::Unsigned => return Ok(transaction.to_vec()),
            SignerMode::Tamper => {
                tx.message.set_recent_blockhash(Hash::new_unique());
            }
            SignerMode::Honest | SignerMode::DropCoSignature => {}
        }
        let index = tx
            .message
            .static_account_keys()
            .iter()
            .position(|key| *key == self.wallet.pubkey())
            .ok_or_else(|| RemoteSignerError::MalformedTransaction("no slot".into()))?;
        let signature = self.wallet.sign_message(&tx.message.serialize());
        if matches!(self.mode, SignerMode::DropCoSignature) {
            tx.signatures = vec![Signature::default(); tx.signatures.len()];
        }
        tx.signatures[index] = signature;
        Ok(serialize_transaction(&tx).expect("serialize"))
    }
}

#[derive(Default)]
pub(crate) struct FakeChain {
    pub(crate) blockhash: Hash,
    pub(crate) blockhash_delay: Option<Duration>,
    pub(crate) submit_delay: Option<Duration>,
    pub(crate) fail_blockhash: bool,
    pub(crate) reject_at: Option<usize>,
    pub(crate) blockhash_calls: AtomicUsize,
    pub(crate) submit_calls: AtomicUsize,
    pub(crate) confirmed: Mutex<Vec<Signature>>,
    pub(crate) submitted: Mutex<Vec<VersionedTransaction>>,
}

impl FakeChain {
    pub(crate) fn new() -> Self {
        Self {
            blockhash: Hash::new_unique(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Broadcaster for FakeChain {
    async fn latest_blockhash(
        &self,
        _commitment: CommitmentConfig,
    ) -> Result<Hash, LanderError> {
        self.blockhash_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.blockhash_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_blockhash {
            return Err(LanderError::Transport("connection refused".into()));
        }
        Ok(self.blockhash)
    }

    async fn submit(
        &self,
        transaction: &VersionedTransaction,
        _options: SubmitOptions,
    ) -> Result<Signature, LanderError> {
        let attempt = self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_at == Some(attempt) {
            return Err(LanderError::Rejected(Rejection::new(
                RejectionKind::InsufficientFunds,
                "insufficient funds for fee",
            )));
        }
        self.submitted.lock().push(transaction.clone());
        Ok(transaction.signatures[0])
    }

    async fn confirm(
        &self,
        signature: &Signature,
        _commitment: CommitmentConfig,
    ) -> Result<(), LanderError> {
        self.confirmed.lock().push(*signature);
        Ok(())
    }
}

pub(crate) struct FixedTables(pub(crate) Vec<AddressLookupTableAccount>);

#[async_trait]
impl LookupTableSource for FixedTables {
    async fn lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> anyhow::Result<Vec<AddressLookupTableAccount>> {
        Ok(self
            .0
            .iter()
            .filter(|table| addresses.contains(&table.key))
            .cloned()
            .collect())
    }
}
