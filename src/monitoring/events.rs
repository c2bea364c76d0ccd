use std::time::Duration;

use metrics::{counter, histogram};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tracing::{info, warn};

use crate::engine::{AssemblyError, TemplateShape};

use super::metrics::prometheus_enabled;

pub fn assembly_succeeded(
    shape: TemplateShape,
    wallet_id: &str,
    signature: &Signature,
    instructions: usize,
    elapsed: Duration,
) {
    let latency_ms = elapsed.as_secs_f64() * 1_000.0;
    info!(
        target: "monitoring::assembly",
        event = "submitted",
        shape = shape.label(),
        wallet_id,
        signature = %signature,
        instructions,
        latency_ms,
        "交易组装并提交成功"
    );

    if prometheus_enabled() {
        counter!(
            "tandem_assembly_total",
            "shape" => shape.label(),
            "result" => "submitted"
        )
        .increment(1);
        histogram!("tandem_assembly_latency_ms", "shape" => shape.label()).record(latency_ms);
    }
}

pub fn assembly_failed(
    shape: Option<TemplateShape>,
    wallet_id: &str,
    error: &AssemblyError,
    elapsed: Duration,
) {
    let shape_label = shape.map(|shape| shape.label()).unwrap_or("unclassified");
    let latency_ms = elapsed.as_secs_f64() * 1_000.0;
    warn!(
        target: "monitoring::assembly",
        event = "failed",
        shape = shape_label,
        wallet_id,
        error_kind = error.label(),
        error_class = ?error.class(),
        retryable = error.is_retryable(),
        latency_ms,
        error = %error,
        "交易组装失败"
    );

    if prometheus_enabled() {
        counter!(
            "tandem_assembly_total",
            "shape" => shape_label,
            "result" => error.label()
        )
        .increment(1);
    }
}

pub fn co_signature_reapplied(wallet_id: &str, co_signer: &Pubkey) {
    warn!(
        target: "monitoring::assembly",
        event = "co_signature_reapplied",
        wallet_id,
        co_signer = %co_signer,
        "远端签名丢失 co-signer 签名，已重新签署"
    );

    if prometheus_enabled() {
        counter!("tandem_co_signature_reapplied_total").increment(1);
    }
}

pub fn remote_sign_latency(wallet_id: &str, elapsed: Duration) {
    let latency_ms = elapsed.as_secs_f64() * 1_000.0;
    tracing::debug!(
        target: "monitoring::assembly",
        event = "remote_signed",
        wallet_id,
        latency_ms,
        "远端签名完成"
    );

    if prometheus_enabled() {
        histogram!("tandem_remote_sign_latency_ms").record(latency_ms);
    }
}

pub fn batch_halted(index: usize, total: usize, landed: usize, error: &AssemblyError) {
    warn!(
        target: "monitoring::assembly",
        event = "batch_halted",
        index,
        total,
        landed,
        error_kind = error.label(),
        error = %error,
        "批量交易中断"
    );

    if prometheus_enabled() {
        counter!("tandem_batch_halted_total", "reason" => error.label()).increment(1);
    }
}

pub fn pool_cache_lookup(pool: &Pubkey, hit: bool) {
    tracing::trace!(
        target: "monitoring::cache",
        event = "pool_lookup",
        pool = %pool,
        hit,
    );

    if prometheus_enabled() {
        let result = if hit { "hit" } else { "miss" };
        counter!("tandem_pool_cache_lookup_total", "result" => result).increment(1);
    }
}

pub fn pool_cache_invalidated(pool: &Pubkey, reason: &str) {
    info!(
        target: "monitoring::cache",
        event = "pool_invalidated",
        pool = %pool,
        reason,
        "池缓存已失效"
    );

    if prometheus_enabled() {
        counter!("tandem_pool_cache_invalidations_total", "reason" => reason.to_string())
            .increment(1);
    }
}
