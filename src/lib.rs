//! AlphaScroll - crypto price prediction arena
//!
//! Users call where a token's price is headed (`up`, `down`, `moon`, `dump`).
//! Calls are stored in a ledger, resolved against market data once their
//! window closes, scored, and rolled up into a persistent leaderboard. Market
//! lookups go through a TTL cache with single-flight deduplication.

pub mod arena;
pub mod config;
pub mod error;
pub mod ledger;
pub mod market;
pub mod types;

// Re-export main types for convenience
pub use arena::{AlphaArena, ArenaBuilder};
pub use config::{ArenaConfig, StorageBackend};
pub use error::{ArenaError, Result};
pub use ledger::SweepReport;
pub use types::{
    Direction, LeaderboardStats, Prediction, PredictionStatus, RankedUser, Timestamp, UserStats,
};
