use anyhow::Result;

use crate::cli::args::{Cli, Command};
use crate::cli::context::{AppContext, init_configs};
use crate::cli::position::handle_position_cmd;
use crate::cli::trade::{handle_send_cmd, handle_swap_cmd, handle_transfer_cmd};
use crate::cli::wallet::{handle_balance_cmd, handle_wallet_cmd};
use crate::config::TandemConfig;

pub async fn run(cli: Cli, config: TandemConfig) -> Result<()> {
    let command = match cli.command {
        Command::Init(args) => return init_configs(args),
        other => other,
    };

    if config.prometheus.enable {
        crate::monitoring::try_init_prometheus(&config.prometheus.listen)?;
    }

    let ctx = AppContext::new(config).await?;
    match command {
        Command::Init(_) => Ok(()),
        Command::Wallet(cmd) => handle_wallet_cmd(cmd, &ctx).await,
        Command::Balance(args) => handle_balance_cmd(args, &ctx).await,
        Command::Transfer(args) => handle_transfer_cmd(args, &ctx).await,
        Command::Swap(args) => handle_swap_cmd(args, &ctx).await,
        Command::Position(cmd) => handle_position_cmd(cmd, &ctx).await,
        Command::Send(args) => handle_send_cmd(args, &ctx).await,
    }
}
