use anyhow::Result;
use clap::Parser;
use tracing::error;

mod api;
mod cache;
mod cli;
mod config;
mod engine;
mod flows;
mod lander;
mod monitoring;
mod txs;
mod wallet;

use cli::args::Cli;
use cli::context::{init_tracing, load_configuration};

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_configuration(cli.config.clone())?;
    init_tracing(&config.global.logging)?;

    if let Err(err) = cli::run(cli, config).await {
        error!(target: "tandem", error = %format!("{err:#}"), "命令执行失败");
        return Err(err);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}
