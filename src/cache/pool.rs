use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;

use crate::monitoring::events;

use super::{Cache, FetchOutcome, InMemoryBackend};

/// 按池地址缓存 DEX 池句柄。由调用方显式持有并传入需要的组件，
/// 池状态变化后调用 `invalidate`。
pub struct PoolCache<P>
where
    P: Send + Sync + 'static,
{
    inner: Cache<InMemoryBackend<Pubkey, P>>,
    ttl: Option<Duration>,
}

impl<P> PoolCache<P>
where
    P: Send + Sync + 'static,
{
    /// `ttl` 为 `None` 时条目只会被显式失效。
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            inner: Cache::new(InMemoryBackend::default()),
            ttl,
        }
    }

    pub async fn get(&self, pool: &Pubkey) -> Option<Arc<P>> {
        let hit = self.inner.get(pool).await;
        events::pool_cache_lookup(pool, hit.is_some());
        hit
    }

    pub async fn load_or_fetch<F, Fut>(&self, pool: Pubkey, fetch: F) -> anyhow::Result<Arc<P>>
    where
        F: FnOnce(Pubkey) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<P>> + Send,
    {
        if let Some(hit) = self.get(&pool).await {
            return Ok(hit);
        }
        let ttl = self.ttl;
        self.inner
            .load_or_fetch(pool, move |key| {
                let fut = fetch(*key);
                async move { fut.await.map(|value| FetchOutcome::new(value, ttl)) }
            })
            .await
    }

    pub async fn invalidate(&self, pool: &Pubkey, reason: &str) {
        self.inner.remove(pool).await;
        events::pool_cache_invalidated(pool, reason);
    }
}
