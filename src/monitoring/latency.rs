use std::borrow::Cow;
use std::time::{Duration, Instant};

use tracing::Level;

pub fn guard_with_fields(
    operation: impl Into<Cow<'static, str>>,
    level: Level,
    fields: Vec<(&'static str, String)>,
) -> LatencyGuard {
    LatencyGuard::new(operation, level, fields)
}

/// 作用域计时器：`finish` 或 drop 时输出一次耗时日志。
#[derive(Debug)]
pub struct LatencyGuard {
    operation: Cow<'static, str>,
    start: Instant,
    level: Level,
    fields: Vec<(&'static str, String)>,
    ended: bool,
}

impl LatencyGuard {
    pub fn new(
        operation: impl Into<Cow<'static, str>>,
        level: Level,
        fields: Vec<(&'static str, String)>,
    ) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
            level,
            fields,
            ended: false,
        }
    }

    pub fn finish(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.ended = true;
        log_latency(self.level, &self.operation, elapsed, &self.fields);
        elapsed
    }
}

impl Drop for LatencyGuard {
    fn drop(&mut self) {
        if !self.ended {
            self.ended = true;
            log_latency(self.level, &self.operation, self.start.elapsed(), &self.fields);
        }
    }
}

fn log_latency(level: Level, operation: &str, elapsed: Duration, fields: &[(&'static str, String)]) {
    let elapsed_ms = format!("{:.3}", elapsed.as_secs_f64() * 1_000.0);
    let metadata = fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");

    macro_rules! log_event {
        ($macro:ident) => {
            tracing::$macro!(
                target: "latency",
                %operation,
                elapsed_ms = %elapsed_ms,
                metadata = %metadata,
                "耗时统计"
            )
        };
    }

    match level {
        Level::ERROR => log_event!(error),
        Level::WARN => log_event!(warn),
        Level::INFO => log_event!(info),
        Level::DEBUG => log_event!(debug),
        Level::TRACE => log_event!(trace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reports_elapsed_once() {
        let guard = guard_with_fields(
            "assemble",
            Level::TRACE,
            vec![("shape", "v0".into()), ("wallet", "w-1".into())],
        );
        std::thread::sleep(Duration::from_millis(2));
        let elapsed = guard.finish();
        assert!(elapsed >= Duration::from_millis(2));
    }
}
