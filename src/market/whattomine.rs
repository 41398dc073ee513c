//! WhatToMine client: mining profitability.

use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::config::ArenaConfig;
use crate::error::{ArenaError, Result};
use crate::market::http::{lenient_f64, UpstreamClient};
use crate::market::types::MiningOpportunity;

/// Opportunities returned per listing.
pub const MAX_MINING_OPPORTUNITIES: usize = 20;

#[derive(Debug, Deserialize)]
struct CoinsResponse {
    #[serde(default)]
    coins: HashMap<String, WtmCoin>,
}

#[derive(Debug, Default, Deserialize)]
struct WtmCoin {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    algorithm: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    profitability: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    difficulty: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    block_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    block_reward: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    estimated_rewards: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    nethash: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    exchange_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    btc_revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    cost: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    profit: Option<f64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    lagging: bool,
    #[serde(default)]
    testing: bool,
}

impl WtmCoin {
    fn into_opportunity(self, id: String) -> MiningOpportunity {
        MiningOpportunity {
            name: self.name.unwrap_or_else(|| self.tag.clone()),
            roi_percent: roi_percent(self.profit, self.cost),
            id,
            tag: self.tag,
            algorithm: self.algorithm,
            profitability: self.profitability.unwrap_or(0.0),
            difficulty: self.difficulty,
            block_time: self.block_time,
            block_reward: self.block_reward,
            estimated_daily: self.estimated_rewards.unwrap_or(0.0),
            nethash: self.nethash,
            exchange_rate: self.exchange_rate,
            btc_revenue: self.btc_revenue,
            revenue: self.revenue,
            cost: self.cost,
            profit: self.profit,
            status: self.status,
            lagging: self.lagging,
            testing: self.testing,
        }
    }
}

/// `/coins/{id}.json` carries the numeric coin id alongside the fields of a
/// listing entry.
#[derive(Debug, Deserialize)]
struct CoinDetail {
    #[serde(default)]
    id: Option<u64>,
    #[serde(flatten)]
    coin: WtmCoin,
}

fn roi_percent(profit: Option<f64>, cost: Option<f64>) -> f64 {
    match (profit, cost) {
        (Some(profit), Some(cost)) if profit != 0.0 && cost != 0.0 => {
            (profit / cost * 100.0 * 100.0).round() / 100.0
        }
        _ => 0.0,
    }
}

/// Keeps profitable coins, most profitable first, capped at
/// [`MAX_MINING_OPPORTUNITIES`].
fn rank_opportunities(coins: HashMap<String, WtmCoin>) -> Vec<MiningOpportunity> {
    let mut opportunities: Vec<MiningOpportunity> = coins
        .into_iter()
        .filter(|(_, coin)| coin.profitability.is_some_and(|p| p > 0.0))
        .map(|(id, coin)| coin.into_opportunity(id))
        .collect();

    opportunities.sort_by(|a, b| {
        b.profitability
            .total_cmp(&a.profitability)
            .then_with(|| a.id.cmp(&b.id))
    });
    opportunities.truncate(MAX_MINING_OPPORTUNITIES);
    opportunities
}

pub struct WhatToMineClient {
    upstream: UpstreamClient,
}

impl WhatToMineClient {
    pub fn new(config: &ArenaConfig) -> Result<Self> {
        let upstream = UpstreamClient::new(
            &config.whattomine_base_url,
            config.http_timeout(),
            config.rate_limit_requests_per_second,
            config.retry_attempts,
        )?;
        info!("WhatToMine client targeting {}", upstream.base_url());
        Ok(Self { upstream })
    }

    /// Most profitable coins to mine right now.
    #[instrument(skip(self))]
    pub async fn mining_opportunities(&self) -> Result<Vec<MiningOpportunity>> {
        let response: CoinsResponse = self.upstream.get_json("/coins.json", &[]).await?;
        let opportunities = rank_opportunities(response.coins);
        debug!("Ranked {} mining opportunities", opportunities.len());
        Ok(opportunities)
    }

    /// Mining figures for one coin, by WhatToMine id or tag (`"etc"`),
    /// `None` if WhatToMine does not list it.
    #[instrument(skip(self))]
    pub async fn coin_mining_data(&self, coin: &str) -> Result<Option<MiningOpportunity>> {
        let coin = coin.trim().to_lowercase();
        if coin.is_empty() {
            return Err(ArenaError::Validation("coin tag must not be empty".to_string()));
        }

        let path = format!("/coins/{}.json", coin);
        match self.upstream.get_json::<CoinDetail>(&path, &[]).await {
            Ok(detail) => {
                let id = detail.id.map(|id| id.to_string()).unwrap_or(coin);
                Ok(Some(detail.coin.into_opportunity(id)))
            }
            Err(ArenaError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
