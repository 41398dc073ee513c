//! External market data: price resolution, upstream clients and the TTL
//! response cache that fronts them.

pub mod cache;
pub mod coingecko;
pub mod http;
pub mod rate_limit;
pub mod resolver;
pub mod sentiment;
pub mod service;
pub mod types;
pub mod whattomine;

pub use cache::TtlCache;
pub use coingecko::CoinGeckoClient;
pub use rate_limit::RequestThrottle;
pub use resolver::PriceResolver;
pub use sentiment::SentimentClient;
pub use service::{with_timeout, MarketData};
pub use types::{
    AlertKind, AlertThreshold, CoinMarket, FearGreedIndex, GasPrices, MarketOverview,
    MiningOpportunity, MoverKind, PriceAlert, TokenSnapshot, TrendingCoin,
};
pub use whattomine::WhatToMineClient;
