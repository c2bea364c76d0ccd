//! 外部 HTTP 服务客户端：托管签名、聚合器、仓位构建服务。
//!
//! 模块只负责网络交互与数据结构定义，交易组装逻辑位于 `engine`。

use metrics::{counter, histogram};
use reqwest::StatusCode;

use crate::monitoring::metrics::prometheus_enabled;

pub mod custody;
pub mod jupiter;
pub mod positions;
pub mod serde_helpers;

pub(crate) fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

pub(crate) fn join_endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// 压缩错误响应体用于日志与错误信息，最多保留 512 字节。
pub(crate) fn summarize_error_body(body: String) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty response body)".to_string();
    }
    let mut single_line = trimmed.replace(['\n', '\r'], " ");
    const MAX_LEN: usize = 512;
    if single_line.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !single_line.is_char_boundary(cut) {
            cut -= 1;
        }
        single_line.truncate(cut);
        single_line.push('…');
    }
    single_line
}

pub(crate) fn record_request_metrics(
    service: &'static str,
    stage: &'static str,
    result: &'static str,
    status: Option<StatusCode>,
    elapsed_ms: Option<f64>,
) {
    if !prometheus_enabled() {
        return;
    }
    let status_label = status
        .map(|code| code.as_u16().to_string())
        .unwrap_or_else(|| "none".to_string());
    counter!(
        "tandem_api_requests_total",
        "service" => service,
        "stage" => stage,
        "result" => result,
        "status" => status_label
    )
    .increment(1);
    if let Some(ms) = elapsed_ms {
        histogram!(
            "tandem_api_latency_ms",
            "service" => service,
            "stage" => stage
        )
        .record(ms);
    }
}
