//! CLI 模块负责解析命令行参数并分发到各子命令处理逻辑。

mod runner;

pub mod args;
pub mod context;
pub mod position;
pub mod trade;
pub mod wallet;

pub use runner::run;
