use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::api::serde_helpers::field_as_string;

/// 流动性分布形状，与 DEX SDK 的 strategy type 对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    Spot,
    Curve,
    BidAsk,
}

/// 池句柄：只保留组装仓位交易所需的字段。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    #[serde(with = "field_as_string")]
    pub address: Pubkey,
    #[serde(with = "field_as_string")]
    pub token_x_mint: Pubkey,
    #[serde(with = "field_as_string")]
    pub token_y_mint: Pubkey,
    pub bin_step: u16,
    pub active_bin_id: i32,
}

/// 单个仓位允许的最大 bin 数。
pub const MAX_RANGE_BINS: u32 = 1_400;

impl PoolInfo {
    /// 以当前活跃 bin 为中心、宽度 `range_bins` 的区间。宽度为 0 或越界时返回 `None`。
    pub fn bin_range(&self, range_bins: u32) -> Option<(i32, i32)> {
        let width = i32::try_from(range_bins).ok().filter(|width| *width > 0)?;
        let min = self.active_bin_id.checked_sub(width / 2)?;
        let max = min.checked_add(width - 1)?;
        Some((min, max))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionRequest {
    #[serde(with = "field_as_string")]
    pub pool: Pubkey,
    #[serde(with = "field_as_string")]
    pub owner: Pubkey,
    /// 新仓位账户，由本地 co-signer 持有私钥。
    #[serde(with = "field_as_string")]
    pub position: Pubkey,
    #[serde(with = "field_as_string")]
    pub amount_x: u64,
    #[serde(with = "field_as_string")]
    pub amount_y: u64,
    pub strategy: StrategyKind,
    pub min_bin_id: i32,
    pub max_bin_id: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRequest {
    #[serde(with = "field_as_string")]
    pub pool: Pubkey,
    #[serde(with = "field_as_string")]
    pub owner: Pubkey,
    #[serde(with = "field_as_string")]
    pub position: Pubkey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesResponse {
    pub transactions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimResponse {
    Claimable { transactions: Vec<String> },
    None,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pool_info_parses_and_centers_range() {
        let address = Pubkey::new_unique();
        let pool: PoolInfo = serde_json::from_value(json!({
            "address": address.to_string(),
            "tokenXMint": Pubkey::new_unique().to_string(),
            "tokenYMint": Pubkey::new_unique().to_string(),
            "binStep": 25,
            "activeBinId": -120,
            "reserveX": "1000"
        }))
        .expect("pool");
        assert_eq!(pool.address, address);
        assert_eq!(pool.bin_range(10), Some((-125, -116)));
        assert_eq!(pool.bin_range(1), Some((-120, -120)));
        assert_eq!(pool.bin_range(0), None);
    }

    #[test]
    fn bin_range_rejects_widths_outside_i32() {
        let mut pool = PoolInfo {
            address: Pubkey::new_unique(),
            token_x_mint: Pubkey::new_unique(),
            token_y_mint: Pubkey::new_unique(),
            bin_step: 10,
            active_bin_id: 0,
        };
        assert_eq!(pool.bin_range(2_147_483_648), None);
        assert_eq!(pool.bin_range(3_000_000_000), None);
        assert_eq!(
            pool.bin_range(i32::MAX as u32),
            Some((-1_073_741_823, 1_073_741_823))
        );

        pool.active_bin_id = i32::MAX - 1;
        assert_eq!(pool.bin_range(4), Some((i32::MAX - 3, i32::MAX)));
        assert_eq!(pool.bin_range(6), None);
        pool.active_bin_id = i32::MIN + 1;
        assert_eq!(pool.bin_range(4), None);
    }

    #[test]
    fn claim_response_distinguishes_empty_fees() {
        let none: ClaimResponse = serde_json::from_value(json!({ "status": "none" })).expect("none");
        assert!(matches!(none, ClaimResponse::None));

        let claimable: ClaimResponse = serde_json::from_value(json!({
            "status": "claimable",
            "transactions": ["AQID", "BAUG"]
        }))
        .expect("claimable");
        match claimable {
            ClaimResponse::Claimable { transactions } => assert_eq!(transactions.len(), 2),
            ClaimResponse::None => panic!("expected claimable"),
        }
    }

    #[test]
    fn open_request_uses_camel_case_strings() {
        let request = OpenPositionRequest {
            pool: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            position: Pubkey::new_unique(),
            amount_x: 5,
            amount_y: 0,
            strategy: StrategyKind::BidAsk,
            min_bin_id: -3,
            max_bin_id: 3,
        };
        let value = serde_json::to_value(&request).expect("to json");
        assert_eq!(value["amountX"], json!("5"));
        assert_eq!(value["strategy"], json!("bidAsk"));
        assert_eq!(value["minBinId"], json!(-3));
    }
}
