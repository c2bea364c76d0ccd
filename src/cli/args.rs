use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;

use crate::api::positions::StrategyKind;

#[derive(Parser, Debug)]
#[command(name = "tandem", version, about = "托管钱包 Solana 双签交易工具")]
pub struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径（默认查找 tandem.toml 或 config/tandem.toml）"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 初始化配置模版文件
    Init(InitCmd),
    /// 托管钱包管理
    #[command(subcommand)]
    Wallet(WalletCmd),
    /// 查询 SOL 与代币余额
    Balance(BalanceArgs),
    /// 转账 SOL 或 SPL 代币
    Transfer(TransferArgs),
    /// 通过聚合器兑换
    Swap(SwapArgs),
    /// 集中流动性仓位操作
    #[command(subcommand)]
    Position(PositionCmd),
    /// 组装并发送磁盘上的 base64 交易模板
    Send(SendArgs),
}

#[derive(Args, Debug)]
pub struct InitCmd {
    #[arg(long, value_name = "DIR", help = "可选输出目录（默认当前目录）")]
    pub output: Option<PathBuf>,
    #[arg(long, help = "若文件存在则覆盖")]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct UserArg {
    #[arg(long, value_name = "ID", help = "用户标识")]
    pub user: String,
}

#[derive(Subcommand, Debug)]
pub enum WalletCmd {
    /// 创建托管钱包并登记到注册表
    Create(UserArg),
    /// 查看已登记的钱包
    Show(UserArg),
}

#[derive(Args, Debug)]
pub struct BalanceArgs {
    #[command(flatten)]
    pub user: UserArg,
    #[arg(long, value_name = "MINT", help = "仅显示指定 mint 的余额")]
    pub mint: Option<Pubkey>,
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    #[command(flatten)]
    pub user: UserArg,
    #[arg(long, value_name = "PUBKEY", help = "收款地址")]
    pub to: Pubkey,
    #[arg(long, value_name = "DECIMAL", help = "转账数量（SOL 或代币的十进制数量）")]
    pub amount: Decimal,
    #[arg(long, value_name = "MINT", help = "SPL 代币 mint，缺省为 SOL")]
    pub mint: Option<Pubkey>,
}

#[derive(Args, Debug)]
pub struct SwapArgs {
    #[command(flatten)]
    pub user: UserArg,
    #[arg(long, value_name = "MINT", help = "输入代币的 Mint 地址")]
    pub input: Pubkey,
    #[arg(long, value_name = "MINT", help = "输出代币的 Mint 地址")]
    pub output: Pubkey,
    #[arg(long, value_name = "RAW", help = "输入数量（最小单位）")]
    pub amount: u64,
    #[arg(long, help = "滑点 bps，缺省取配置 jupiter.slippage_bps")]
    pub slippage_bps: Option<u16>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Spot,
    Curve,
    BidAsk,
}

impl From<StrategyArg> for StrategyKind {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Spot => StrategyKind::Spot,
            StrategyArg::Curve => StrategyKind::Curve,
            StrategyArg::BidAsk => StrategyKind::BidAsk,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum PositionCmd {
    /// 开仓（本地生成仓位账户并 co-sign）
    Open(OpenPositionArgs),
    /// 撤出全部流动性并关闭仓位
    Close(PositionArgs),
    /// 领取手续费
    Claim(PositionArgs),
}

#[derive(Args, Debug)]
pub struct OpenPositionArgs {
    #[command(flatten)]
    pub user: UserArg,
    #[arg(long, value_name = "POOL", help = "池地址")]
    pub pool: Pubkey,
    #[arg(long, default_value_t = 0u64, help = "存入 token X 数量（最小单位）")]
    pub amount_x: u64,
    #[arg(long, default_value_t = 0u64, help = "存入 token Y 数量（最小单位）")]
    pub amount_y: u64,
    #[arg(long, value_enum, default_value_t = StrategyArg::Spot, help = "流动性分布策略")]
    pub strategy: StrategyArg,
    #[arg(long, value_name = "N", help = "bin 区间宽度（1..=1400），缺省取配置 positions.default_range_bins")]
    pub range: Option<u32>,
}

#[derive(Args, Debug)]
pub struct PositionArgs {
    #[command(flatten)]
    pub user: UserArg,
    #[arg(long, value_name = "POOL", help = "池地址")]
    pub pool: Pubkey,
    #[arg(long, value_name = "POS", help = "仓位账户地址")]
    pub position: Pubkey,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub user: UserArg,
    #[arg(long, value_name = "FILE", help = "包含 base64 交易模板的文件")]
    pub template: PathBuf,
    #[arg(
        long,
        value_name = "FILE",
        help = "co-signer keypair 文件（solana-keygen JSON 格式）"
    )]
    pub co_signer_file: Option<PathBuf>,
}
