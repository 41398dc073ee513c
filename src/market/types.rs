//! Market-data records returned by the upstream clients.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which end of the 24h performance table to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoverKind {
    Gainers,
    Losers,
}

impl MoverKind {
    /// `order` parameter for `/coins/markets`.
    pub fn order_param(&self) -> &'static str {
        match self {
            MoverKind::Gainers => "price_change_percentage_24h_desc",
            MoverKind::Losers => "price_change_percentage_24h_asc",
        }
    }
}

impl fmt::Display for MoverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoverKind::Gainers => write!(f, "gainers"),
            MoverKind::Losers => write!(f, "losers"),
        }
    }
}

/// One row of `/coins/markets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinMarket {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_7d_in_currency: Option<f64>,
}

/// Detailed view of a single coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub current_price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub total_volume_usd: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub price_change_percentage_7d: Option<f64>,
    pub price_change_percentage_30d: Option<f64>,
    pub ath_usd: Option<f64>,
    pub atl_usd: Option<f64>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub blockchain_sites: Vec<String>,
    pub image: Option<String>,
}

/// Entry of `/search/trending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingCoin {
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub score: Option<u32>,
}

/// Global market figures from `/global`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub total_market_cap_usd: Option<f64>,
    pub total_volume_usd: Option<f64>,
    pub market_cap_percentage: HashMap<String, f64>,
    pub market_cap_change_24h: Option<f64>,
    pub active_cryptocurrencies: Option<u64>,
    pub markets: Option<u64>,
    pub defi_market_cap_usd: Option<f64>,
    /// DeFi share of total market cap, in percent.
    pub defi_to_total_market_cap_ratio: Option<f64>,
    pub updated_at: Option<i64>,
}

impl MarketOverview {
    /// Bitcoin's share of total market cap, in percent.
    pub fn btc_dominance(&self) -> Option<f64> {
        self.market_cap_percentage.get("btc").copied()
    }
}

/// A mineable coin ranked by profitability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningOpportunity {
    pub id: String,
    pub name: String,
    pub tag: String,
    pub algorithm: String,
    pub profitability: f64,
    pub difficulty: Option<f64>,
    pub block_time: Option<f64>,
    pub block_reward: Option<f64>,
    pub estimated_daily: f64,
    pub nethash: Option<f64>,
    pub exchange_rate: Option<f64>,
    pub btc_revenue: Option<f64>,
    pub revenue: Option<f64>,
    pub cost: Option<f64>,
    pub profit: Option<f64>,
    pub status: Option<String>,
    pub lagging: bool,
    pub testing: bool,
    /// `profit / cost * 100`, two decimals; zero when either is missing.
    pub roi_percent: f64,
}

/// Latest reading of the crypto Fear & Greed index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearGreedIndex {
    /// 0 (extreme fear) to 100 (extreme greed)
    pub value: u8,
    pub classification: String,
    /// Unix seconds
    pub timestamp: i64,
    pub seconds_until_update: Option<u64>,
}

/// Ethereum gas oracle, in gwei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasPrices {
    pub last_block: Option<u64>,
    pub safe_gwei: f64,
    pub propose_gwei: f64,
    pub fast_gwei: f64,
    pub suggested_base_fee_gwei: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertKind {
    Pump,
    Dump,
}

/// 24h move thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub up: f64,
    pub down: f64,
}

impl Default for AlertThreshold {
    fn default() -> Self {
        Self {
            up: 10.0,
            down: -10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub kind: AlertKind,
    pub token: TokenSnapshot,
    pub change_24h: f64,
    pub message: String,
}

impl PriceAlert {
    /// Alert for `token` if its 24h move crosses `threshold`.
    pub fn check(token: &TokenSnapshot, threshold: AlertThreshold) -> Option<Self> {
        let change = token.price_change_percentage_24h?;
        let (kind, message) = if change >= threshold.up {
            (
                AlertKind::Pump,
                format!("{} is up {:.2}% in 24h", token.name, change),
            )
        } else if change <= threshold.down {
            (
                AlertKind::Dump,
                format!("{} is down {:.2}% in 24h", token.name, change.abs()),
            )
        } else {
            return None;
        };

        Some(Self {
            kind,
            token: token.clone(),
            change_24h: change,
            message,
        })
    }
}
