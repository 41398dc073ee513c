//! Rankings derived from user stats on demand. No rank is ever stored.

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::ledger::storage::LedgerStorage;
use crate::types::{LeaderboardStats, RankedUser};

#[derive(Clone)]
pub struct LeaderboardRanker {
    storage: Arc<dyn LedgerStorage>,
    max_size: usize,
}

impl LeaderboardRanker {
    pub fn new(storage: Arc<dyn LedgerStorage>, max_size: usize) -> Self {
        Self { storage, max_size }
    }

    /// Best users first, ranked 1.. by position. `limit` is capped at the
    /// configured leaderboard size.
    pub async fn top_n(&self, limit: usize) -> Result<Vec<RankedUser>> {
        let limit = limit.min(self.max_size);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let users = self.storage.rank_users(limit).await?;
        Ok(users
            .into_iter()
            .enumerate()
            .map(|(position, stats)| RankedUser {
                rank: position as u64 + 1,
                stats,
            })
            .collect())
    }

    /// Competition rank of `user_id`: users with the same score share a
    /// rank. `None` for a user who never predicted.
    pub async fn rank_of(&self, user_id: &str) -> Result<Option<u64>> {
        let user_id = user_id.trim().to_lowercase();
        let Some(user) = self.storage.get_user(&user_id).await? else {
            debug!("No stats for {}, unranked", user_id);
            return Ok(None);
        };

        let ahead = self
            .storage
            .count_strictly_greater_score(user.total_score)
            .await?;
        Ok(Some(ahead + 1))
    }

    pub async fn stats(&self) -> Result<LeaderboardStats> {
        self.storage.aggregate_stats().await
    }
}
