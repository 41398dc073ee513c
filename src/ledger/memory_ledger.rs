//! In-memory implementation of the ledger storage.
//!
//! Used when no durable store is configured or reachable. One lock guards
//! both tables for the whole read-modify-write of every operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ArenaError, Result};
use crate::ledger::storage::LedgerStorage;
use crate::types::{LeaderboardStats, Prediction, PredictionStatus, Timestamp, UserStats};

#[derive(Debug, Default)]
struct Tables {
    predictions: BTreeMap<i64, Prediction>,
    users: HashMap<String, UserStats>,
    last_id: i64,
}

/// Single-process ledger kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ArenaError::Persistence("in-memory ledger is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerStorage for MemoryLedger {
    async fn insert_prediction(&self, prediction: &Prediction) -> Result<i64> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;

        tables.last_id += 1;
        let id = tables.last_id;

        let mut stored = prediction.clone();
        stored.id = Some(id);
        tables.predictions.insert(id, stored);

        let user = tables
            .users
            .entry(prediction.user_id.clone())
            .or_insert_with(|| UserStats::new(prediction.user_id.clone(), prediction.created_at));
        user.total_predictions += 1;
        user.last_active = user.last_active.max(prediction.created_at);

        debug!("Stored prediction {} in memory for {}", id, prediction.user_id);
        Ok(id)
    }

    async fn get_pending_expired(&self, now: Timestamp) -> Result<Vec<Prediction>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;

        let mut expired: Vec<Prediction> = tables
            .predictions
            .values()
            .filter(|p| p.status == PredictionStatus::Pending && p.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|p| (p.expires_at, p.id));
        Ok(expired)
    }

    async fn update_prediction_and_user(
        &self,
        prediction_id: i64,
        new_status: PredictionStatus,
        score_delta: i64,
        now: Timestamp,
    ) -> Result<bool> {
        if !new_status.is_resolved() {
            return Err(ArenaError::Validation(
                "a prediction can only transition to correct or incorrect".to_string(),
            ));
        }
        self.ensure_open()?;
        let mut tables = self.tables.write().await;

        let user_id = match tables.predictions.get_mut(&prediction_id) {
            Some(prediction) if prediction.status == PredictionStatus::Pending => {
                prediction.status = new_status;
                prediction.score = score_delta;
                prediction.evaluated_at = Some(now);
                prediction.user_id.clone()
            }
            _ => return Ok(false),
        };

        if let Some(user) = tables.users.get_mut(&user_id) {
            if new_status == PredictionStatus::Correct {
                user.correct_predictions += 1;
            }
            user.total_score = (user.total_score + score_delta).max(0);
            user.last_active = user.last_active.max(now);
        }

        Ok(true)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserStats>> {
        self.ensure_open()?;
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn get_prediction(&self, id: i64) -> Result<Option<Prediction>> {
        self.ensure_open()?;
        Ok(self.tables.read().await.predictions.get(&id).cloned())
    }

    async fn get_user_predictions(&self, user_id: &str, limit: usize) -> Result<Vec<Prediction>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;

        let mut predictions: Vec<Prediction> = tables
            .predictions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        predictions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        predictions.truncate(limit);
        Ok(predictions)
    }

    async fn rank_users(&self, limit: usize) -> Result<Vec<UserStats>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;

        let mut users: Vec<UserStats> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| {
            b.total_score
                .cmp(&a.total_score)
                .then(a.joined_at.cmp(&b.joined_at))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        users.truncate(limit);
        Ok(users)
    }

    async fn count_strictly_greater_score(&self, score: i64) -> Result<u64> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables.users.values().filter(|u| u.total_score > score).count() as u64)
    }

    async fn aggregate_stats(&self) -> Result<LeaderboardStats> {
        self.ensure_open()?;
        let tables = self.tables.read().await;

        Ok(tables.users.values().fold(
            LeaderboardStats {
                total_users: tables.users.len() as u64,
                ..LeaderboardStats::default()
            },
            |mut acc, user| {
                acc.total_predictions += user.total_predictions;
                acc.correct_predictions += user.correct_predictions;
                acc
            },
        ))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.closed.load(Ordering::Acquire))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
