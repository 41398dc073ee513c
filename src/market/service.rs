//! Cached market-data facade.
//!
//! Every lookup goes through a [`TtlCache`], so identical concurrent requests
//! collapse into a single upstream call and repeated requests within the TTL
//! are served from memory.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ArenaConfig;
use crate::error::{ArenaError, Result};
use crate::market::cache::TtlCache;
use crate::market::coingecko::CoinGeckoClient;
use crate::market::sentiment::SentimentClient;
use crate::market::types::{
    AlertThreshold, CoinMarket, FearGreedIndex, GasPrices, MarketOverview, MiningOpportunity,
    MoverKind, PriceAlert, TokenSnapshot, TrendingCoin,
};
use crate::market::whattomine::WhatToMineClient;

/// Runs `fut` under `budget`; running out of time is a transient failure.
pub async fn with_timeout<T, Fut>(budget: Duration, what: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| ArenaError::TransientFetch(format!("{} timed out after {:?}", what, budget)))?
}

pub struct MarketData {
    coingecko: Arc<CoinGeckoClient>,
    whattomine: Arc<WhatToMineClient>,
    sentiment: Arc<SentimentClient>,
    ttl: Duration,
    fetch_timeout: Duration,
    movers: TtlCache<(MoverKind, usize), Vec<CoinMarket>>,
    tokens: TtlCache<String, Option<TokenSnapshot>>,
    trending: TtlCache<(), Vec<TrendingCoin>>,
    overview: TtlCache<(), MarketOverview>,
    mining: TtlCache<(), Vec<MiningOpportunity>>,
    coin_mining: TtlCache<String, Option<MiningOpportunity>>,
    fear_greed: TtlCache<(), FearGreedIndex>,
    gas: TtlCache<(), GasPrices>,
}

impl MarketData {
    pub fn new(
        config: &ArenaConfig,
        coingecko: Arc<CoinGeckoClient>,
        whattomine: Arc<WhatToMineClient>,
        sentiment: Arc<SentimentClient>,
    ) -> Self {
        let capacity = config.max_cache_entries as u64;
        // Covers the first attempt plus every retry.
        let fetch_timeout = config.http_timeout() * (config.retry_attempts as u32 + 1);

        Self {
            coingecko,
            whattomine,
            sentiment,
            ttl: config.cache_ttl(),
            fetch_timeout,
            movers: TtlCache::new(capacity),
            tokens: TtlCache::new(capacity),
            trending: TtlCache::new(1),
            overview: TtlCache::new(1),
            mining: TtlCache::new(1),
            coin_mining: TtlCache::new(capacity),
            fear_greed: TtlCache::new(1),
            gas: TtlCache::new(1),
        }
    }

    /// Builds every upstream client from `config`.
    pub fn from_config(config: &ArenaConfig) -> Result<Self> {
        let coingecko = Arc::new(CoinGeckoClient::new(config)?);
        let whattomine = Arc::new(WhatToMineClient::new(config)?);
        let sentiment = Arc::new(SentimentClient::new(config)?);
        Ok(Self::new(config, coingecko, whattomine, sentiment))
    }

    /// Shared CoinGecko client, also usable as the price resolver.
    pub fn coingecko(&self) -> Arc<CoinGeckoClient> {
        self.coingecko.clone()
    }

    pub async fn top_gainers(&self, limit: usize) -> Result<Vec<CoinMarket>> {
        self.top_movers(MoverKind::Gainers, limit).await
    }

    pub async fn top_losers(&self, limit: usize) -> Result<Vec<CoinMarket>> {
        self.top_movers(MoverKind::Losers, limit).await
    }

    async fn top_movers(&self, kind: MoverKind, limit: usize) -> Result<Vec<CoinMarket>> {
        self.movers
            .get((kind, limit), self.ttl, || {
                with_timeout(
                    self.fetch_timeout,
                    "top movers",
                    self.coingecko.top_movers(kind, limit),
                )
            })
            .await
    }

    /// Snapshot of the token matching `query`, `None` if CoinGecko has no
    /// match.
    pub async fn token(&self, query: &str) -> Result<Option<TokenSnapshot>> {
        let key = query.trim().to_lowercase();
        self.tokens
            .get(key.clone(), self.ttl, || async {
                with_timeout(
                    self.fetch_timeout,
                    "token snapshot",
                    self.coingecko.token_snapshot(&key),
                )
                .await
            })
            .await
    }

    pub async fn trending(&self) -> Result<Vec<TrendingCoin>> {
        self.trending
            .get((), self.ttl, || {
                with_timeout(self.fetch_timeout, "trending", self.coingecko.trending())
            })
            .await
    }

    pub async fn overview(&self) -> Result<MarketOverview> {
        self.overview
            .get((), self.ttl, || {
                with_timeout(
                    self.fetch_timeout,
                    "market overview",
                    self.coingecko.market_overview(),
                )
            })
            .await
    }

    pub async fn mining_opportunities(&self) -> Result<Vec<MiningOpportunity>> {
        self.mining
            .get((), self.ttl, || {
                with_timeout(
                    self.fetch_timeout,
                    "mining opportunities",
                    self.whattomine.mining_opportunities(),
                )
            })
            .await
    }

    /// Mining figures for one coin tag, `None` if WhatToMine does not list it.
    pub async fn coin_mining_data(&self, coin: &str) -> Result<Option<MiningOpportunity>> {
        let key = coin.trim().to_lowercase();
        self.coin_mining
            .get(key.clone(), self.ttl, || async {
                with_timeout(
                    self.fetch_timeout,
                    "coin mining data",
                    self.whattomine.coin_mining_data(&key),
                )
                .await
            })
            .await
    }

    pub async fn fear_and_greed(&self) -> Result<FearGreedIndex> {
        self.fear_greed
            .get((), self.ttl, || {
                with_timeout(
                    self.fetch_timeout,
                    "fear & greed index",
                    self.sentiment.fear_and_greed(),
                )
            })
            .await
    }

    pub async fn gas_prices(&self) -> Result<GasPrices> {
        self.gas
            .get((), self.ttl, || {
                with_timeout(self.fetch_timeout, "gas prices", self.sentiment.gas_prices())
            })
            .await
    }

    /// Pump/dump alerts for `tokens`. Tokens without a threshold entry use
    /// the default ±10%. Lookup failures skip that token.
    pub async fn price_alerts(
        &self,
        tokens: &[String],
        thresholds: &HashMap<String, AlertThreshold>,
    ) -> Vec<PriceAlert> {
        let mut alerts = Vec::new();
        for token in tokens {
            let snapshot = match self.token(token).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping price alert for {}: {}", token, e);
                    continue;
                }
            };
            let threshold = thresholds.get(token).copied().unwrap_or_default();
            if let Some(alert) = PriceAlert::check(&snapshot, threshold) {
                info!("{}", alert.message);
                alerts.push(alert);
            }
        }
        alerts
    }

    /// Drops expired entries from every cache.
    pub async fn purge_expired(&self) {
        self.movers.purge_expired().await;
        self.tokens.purge_expired().await;
        self.trending.purge_expired().await;
        self.overview.purge_expired().await;
        self.mining.purge_expired().await;
        self.coin_mining.purge_expired().await;
        self.fear_greed.purge_expired().await;
        self.gas.purge_expired().await;
    }

    pub fn clear(&self) {
        self.movers.invalidate_all();
        self.tokens.invalidate_all();
        self.trending.invalidate_all();
        self.overview.invalidate_all();
        self.mining.invalidate_all();
        self.coin_mining.invalidate_all();
        self.fear_greed.invalidate_all();
        self.gas.invalidate_all();
    }

    /// Approximate number of cached responses.
    pub fn cached_entries(&self) -> u64 {
        self.movers.entry_count()
            + self.tokens.entry_count()
            + self.trending.entry_count()
            + self.overview.entry_count()
            + self.mining.entry_count()
            + self.coin_mining.entry_count()
            + self.fear_greed.entry_count()
            + self.gas.entry_count()
    }
}
