//! CoinGecko client: price history, coin details and market tables.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::ArenaConfig;
use crate::error::{ArenaError, Result};
use crate::market::cache::TtlCache;
use crate::market::http::{lenient_f64, UpstreamClient};
use crate::market::resolver::PriceResolver;
use crate::market::types::{CoinMarket, MarketOverview, MoverKind, TokenSnapshot, TrendingCoin};
use crate::types::{now_millis, Timestamp};

const API_KEY_HEADER: &str = "X-CG-Pro-Api-Key";
/// Coins ranked below this are too thin to list as movers.
const MAX_MOVER_RANK: u32 = 1000;
const DESCRIPTION_LIMIT: usize = 500;
const COIN_ID_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const COIN_ID_CACHE_ENTRIES: u64 = 10_000;

type Quotes = HashMap<String, Option<f64>>;

fn usd(quotes: &Quotes) -> Option<f64> {
    quotes.get("usd").copied().flatten()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    coins: Vec<SearchCoin>,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchCoin {
    id: String,
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
struct TrendingResponse {
    #[serde(default)]
    coins: Vec<TrendingEntry>,
}

#[derive(Debug, Deserialize)]
struct TrendingEntry {
    item: TrendingCoin,
}

#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    #[serde(default)]
    total_market_cap: Quotes,
    #[serde(default)]
    total_volume: Quotes,
    #[serde(default)]
    market_cap_percentage: HashMap<String, f64>,
    #[serde(default)]
    market_cap_change_percentage_24h_usd: Option<f64>,
    #[serde(default)]
    active_cryptocurrencies: Option<u64>,
    #[serde(default)]
    markets: Option<u64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    defi_market_cap: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    defi_to_total_market_cap_ratio: Option<f64>,
    #[serde(default)]
    updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CoinDetail {
    id: String,
    name: String,
    symbol: String,
    #[serde(default)]
    market_cap_rank: Option<u32>,
    #[serde(default)]
    market_data: Option<CoinMarketData>,
    #[serde(default)]
    description: HashMap<String, Option<String>>,
    #[serde(default)]
    links: CoinLinks,
    #[serde(default)]
    image: CoinImage,
}

#[derive(Debug, Default, Deserialize)]
struct CoinMarketData {
    #[serde(default)]
    current_price: Quotes,
    #[serde(default)]
    market_cap: Quotes,
    #[serde(default)]
    total_volume: Quotes,
    #[serde(default)]
    price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    price_change_percentage_7d: Option<f64>,
    #[serde(default)]
    price_change_percentage_30d: Option<f64>,
    #[serde(default)]
    ath: Quotes,
    #[serde(default)]
    atl: Quotes,
}

#[derive(Debug, Default, Deserialize)]
struct CoinLinks {
    #[serde(default)]
    homepage: Vec<Option<String>>,
    #[serde(default)]
    blockchain_site: Vec<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct CoinImage {
    #[serde(default)]
    large: Option<String>,
}

fn non_empty(links: Vec<Option<String>>) -> Vec<String> {
    links
        .into_iter()
        .flatten()
        .filter(|link| !link.trim().is_empty())
        .collect()
}

impl From<CoinDetail> for TokenSnapshot {
    fn from(detail: CoinDetail) -> Self {
        let market = detail.market_data.unwrap_or_default();
        let description = detail
            .description
            .get("en")
            .cloned()
            .flatten()
            .filter(|text| !text.trim().is_empty())
            .map(|text| truncate_description(&text));

        TokenSnapshot {
            id: detail.id,
            name: detail.name,
            symbol: detail.symbol,
            current_price_usd: usd(&market.current_price),
            market_cap_usd: usd(&market.market_cap),
            market_cap_rank: detail.market_cap_rank,
            total_volume_usd: usd(&market.total_volume),
            price_change_percentage_24h: market.price_change_percentage_24h,
            price_change_percentage_7d: market.price_change_percentage_7d,
            price_change_percentage_30d: market.price_change_percentage_30d,
            ath_usd: usd(&market.ath),
            atl_usd: usd(&market.atl),
            description,
            homepage: non_empty(detail.links.homepage).into_iter().next(),
            blockchain_sites: non_empty(detail.links.blockchain_site),
            image: detail.image.large,
        }
    }
}

impl From<GlobalData> for MarketOverview {
    fn from(global: GlobalData) -> Self {
        MarketOverview {
            total_market_cap_usd: usd(&global.total_market_cap),
            total_volume_usd: usd(&global.total_volume),
            market_cap_percentage: global.market_cap_percentage,
            market_cap_change_24h: global.market_cap_change_percentage_24h_usd,
            active_cryptocurrencies: global.active_cryptocurrencies,
            markets: global.markets,
            defi_market_cap_usd: global.defi_market_cap,
            defi_to_total_market_cap_ratio: global.defi_to_total_market_cap_ratio,
            updated_at: global.updated_at,
        }
    }
}

fn truncate_description(text: &str) -> String {
    if text.chars().count() <= DESCRIPTION_LIMIT {
        text.to_string()
    } else {
        let head: String = text.chars().take(DESCRIPTION_LIMIT).collect();
        format!("{}...", head)
    }
}

/// Picks the coin id for a free-text query: an exact id match wins, then an
/// exact symbol match, then CoinGecko's top hit.
fn pick_coin_id(query: &str, coins: &[SearchCoin]) -> Option<String> {
    let query = query.trim().to_lowercase();
    coins
        .iter()
        .find(|c| c.id == query)
        .or_else(|| coins.iter().find(|c| c.symbol.to_lowercase() == query))
        .or_else(|| coins.first())
        .map(|c| c.id.clone())
}

/// Percent change from the first sample at or after `since` to the last
/// sample. `None` when there is no later sample to compare against.
pub fn percent_change_since(prices: &[(f64, f64)], since: Timestamp) -> Option<f64> {
    let start = prices.iter().position(|(ts, _)| *ts >= since as f64)?;
    let last = prices.len().checked_sub(1)?;
    if start >= last {
        return None;
    }

    let from = prices[start].1;
    let to = prices[last].1;
    if !from.is_finite() || !to.is_finite() || from <= 0.0 {
        return None;
    }
    Some((to - from) / from * 100.0)
}

/// Keeps ranked coins that actually moved in the requested direction.
pub fn filter_movers(kind: MoverKind, coins: Vec<CoinMarket>) -> Vec<CoinMarket> {
    coins
        .into_iter()
        .filter(|coin| {
            let ranked = coin
                .market_cap_rank
                .map_or(false, |rank| rank <= MAX_MOVER_RANK);
            let moved = match (kind, coin.price_change_percentage_24h) {
                (MoverKind::Gainers, Some(change)) => change > 0.0,
                (MoverKind::Losers, Some(change)) => change < 0.0,
                (_, None) => false,
            };
            ranked && moved
        })
        .collect()
}

/// Client for the public (or Pro, with an API key) CoinGecko API.
pub struct CoinGeckoClient {
    upstream: UpstreamClient,
    coin_ids: TtlCache<String, Option<String>>,
}

impl CoinGeckoClient {
    pub fn new(config: &ArenaConfig) -> Result<Self> {
        let mut upstream = UpstreamClient::new(
            &config.coingecko_base_url,
            config.http_timeout(),
            config.rate_limit_requests_per_second,
            config.retry_attempts,
        )?;
        if let Some(key) = config.coingecko_api_key.clone() {
            upstream = upstream.with_auth_header(API_KEY_HEADER, key);
        }

        info!("CoinGecko client targeting {}", upstream.base_url());
        Ok(Self {
            upstream,
            coin_ids: TtlCache::new(COIN_ID_CACHE_ENTRIES),
        })
    }

    /// Connectivity check against `/ping`.
    pub async fn ping(&self) -> Result<bool> {
        let _: serde_json::Value = self.upstream.get_json("/ping", &[]).await?;
        Ok(true)
    }

    /// Maps a user-supplied token (`btc`, `bitcoin`, `Bitcoin`) to a
    /// CoinGecko coin id. Lookups are remembered for a day.
    #[instrument(skip(self))]
    pub async fn resolve_coin_id(&self, query: &str) -> Result<Option<String>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(None);
        }

        self.coin_ids
            .get(query.clone(), COIN_ID_TTL, || async {
                let response: SearchResponse = self
                    .upstream
                    .get_json("/search", &[("query", query.clone())])
                    .await?;
                Ok(pick_coin_id(&query, &response.coins))
            })
            .await
    }

    /// Detailed snapshot of the coin best matching `query`.
    #[instrument(skip(self))]
    pub async fn token_snapshot(&self, query: &str) -> Result<Option<TokenSnapshot>> {
        let Some(coin_id) = self.resolve_coin_id(query).await? else {
            return Ok(None);
        };

        let path = format!("/coins/{}", coin_id);
        let query = [
            ("localization", "false".to_string()),
            ("tickers", "false".to_string()),
            ("market_data", "true".to_string()),
            ("community_data", "false".to_string()),
            ("developer_data", "false".to_string()),
            ("sparkline", "false".to_string()),
        ];
        match self.upstream.get_json::<CoinDetail>(&path, &query).await {
            Ok(detail) => Ok(Some(detail.into())),
            Err(ArenaError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Top 24h gainers or losers among the first `limit` rows.
    #[instrument(skip(self))]
    pub async fn top_movers(&self, kind: MoverKind, limit: usize) -> Result<Vec<CoinMarket>> {
        let query = [
            ("vs_currency", "usd".to_string()),
            ("order", kind.order_param().to_string()),
            ("per_page", limit.to_string()),
            ("page", "1".to_string()),
            ("sparkline", "false".to_string()),
            ("price_change_percentage", "24h,7d".to_string()),
        ];
        let coins: Vec<CoinMarket> = self.upstream.get_json("/coins/markets", &query).await?;
        let movers = filter_movers(kind, coins);
        debug!("Fetched {} top {}", movers.len(), kind);
        Ok(movers)
    }

    #[instrument(skip(self))]
    pub async fn trending(&self) -> Result<Vec<TrendingCoin>> {
        let response: TrendingResponse = self.upstream.get_json("/search/trending", &[]).await?;
        Ok(response.coins.into_iter().map(|entry| entry.item).collect())
    }

    #[instrument(skip(self))]
    pub async fn market_overview(&self) -> Result<MarketOverview> {
        let response: GlobalResponse = self.upstream.get_json("/global", &[]).await?;
        Ok(response.data.into())
    }
}

#[async_trait]
impl PriceResolver for CoinGeckoClient {
    #[instrument(skip(self))]
    async fn price_change_since(&self, token_id: &str, since: Timestamp) -> Result<Option<f64>> {
        let Some(coin_id) = self.resolve_coin_id(token_id).await? else {
            debug!("No CoinGecko coin matches {}", token_id);
            return Ok(None);
        };

        let path = format!("/coins/{}/market_chart/range", coin_id);
        let query = [
            ("vs_currency", "usd".to_string()),
            ("from", (since / 1000).to_string()),
            ("to", (now_millis() / 1000).to_string()),
        ];
        match self.upstream.get_json::<MarketChart>(&path, &query).await {
            Ok(chart) => Ok(percent_change_since(&chart.prices, since)),
            Err(ArenaError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
