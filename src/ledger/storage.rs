//! Storage abstraction layer for the prediction ledger
//!
//! This module defines the formal contract for persisting predictions and
//! user statistics, so business logic stays agnostic of the backend that is
//! chosen once at startup.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ArenaConfig, StorageBackend};
use crate::error::Result;
use crate::ledger::memory_ledger::MemoryLedger;
use crate::ledger::sqlite_ledger::SqliteLedger;
use crate::types::{LeaderboardStats, Prediction, PredictionStatus, Timestamp, UserStats};

/// Formal contract for the arena's persistent memory.
/// Every operation here must be supported by any backend.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Saves a new prediction and, in the same atomic unit, creates the
    /// user's stats if absent and increments `total_predictions`.
    /// Returns the identifier assigned to the prediction.
    async fn insert_prediction(&self, prediction: &Prediction) -> Result<i64>;

    /// All pending predictions whose deadline is at or before `now`,
    /// earliest deadline first.
    async fn get_pending_expired(&self, now: Timestamp) -> Result<Vec<Prediction>>;

    /// Resolves a pending prediction and applies the matching user-stats
    /// delta atomically. The resulting `total_score` is clamped at zero.
    ///
    /// Returns `false` without touching anything when the prediction is
    /// unknown or already resolved, so retries and overlapping sweeps are
    /// harmless.
    async fn update_prediction_and_user(
        &self,
        prediction_id: i64,
        new_status: PredictionStatus,
        score_delta: i64,
        now: Timestamp,
    ) -> Result<bool>;

    /// Retrieves stats for a user, if the user ever predicted.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserStats>>;

    /// Retrieves a prediction by its identifier.
    async fn get_prediction(&self, id: i64) -> Result<Option<Prediction>>;

    /// Most recent predictions of a user, newest first.
    async fn get_user_predictions(&self, user_id: &str, limit: usize) -> Result<Vec<Prediction>>;

    /// Users ordered by `total_score` descending, earlier `joined_at` first
    /// on ties.
    async fn rank_users(&self, limit: usize) -> Result<Vec<UserStats>>;

    /// Number of users with a total score strictly greater than `score`.
    async fn count_strictly_greater_score(&self, score: i64) -> Result<u64>;

    /// Arena-wide totals.
    async fn aggregate_stats(&self) -> Result<LeaderboardStats>;

    /// Health check for the storage backend.
    async fn health_check(&self) -> Result<bool>;

    /// Releases the backend. Later calls fail with a persistence error.
    async fn close(&self);

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Opens the configured backend.
///
/// When the durable store cannot be opened and `fallback_to_memory` is set,
/// the in-memory store is used instead.
pub async fn open_storage(config: &ArenaConfig) -> Result<Arc<dyn LedgerStorage>> {
    match &config.storage {
        StorageBackend::Memory => {
            info!("Using in-memory ledger storage");
            Ok(Arc::new(MemoryLedger::new()))
        }
        StorageBackend::Sqlite { url } => match SqliteLedger::connect(url).await {
            Ok(ledger) => Ok(Arc::new(ledger)),
            Err(e) if config.fallback_to_memory => {
                warn!(
                    "Failed to open SQLite ledger ({}); falling back to in-memory storage",
                    e
                );
                Ok(Arc::new(MemoryLedger::new()))
            }
            Err(e) => Err(e),
        },
    }
}
