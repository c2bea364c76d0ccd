pub mod balance;
pub mod registry;

pub use balance::{MintInfo, TokenBalance, WalletBalances, fetch_balances, fetch_mint};
pub use registry::{RegistryError, WalletRegistry};
