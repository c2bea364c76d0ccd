pub mod events;
pub mod latency;
pub mod metrics;

pub use latency::guard_with_fields;
pub use metrics::try_init_prometheus;
