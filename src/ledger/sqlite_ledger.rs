//! SqliteLedger module - SQLite implementation of the ledger storage
//!
//! Predictions and user statistics live in two tables. Every counter change
//! is expressed as a single SQL increment inside one transaction, so a
//! prediction insert and a concurrent evaluation of the same user can never
//! lose each other's update.

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use tracing::{debug, info, warn};

use crate::error::{ArenaError, Result};
use crate::ledger::storage::LedgerStorage;
use crate::types::{
    Direction, LeaderboardStats, Prediction, PredictionStatus, Timestamp, UserStats,
};

/// Maps a driver error to a persistence error with a context message.
fn persistence(context: &'static str) -> impl FnOnce(sqlx::Error) -> ArenaError {
    move |e| ArenaError::Persistence(format!("{}: {}", context, e))
}

#[derive(FromRow)]
struct PredictionRow {
    id: i64,
    user_id: String,
    token_id: String,
    direction: String,
    created_at: i64,
    expires_at: i64,
    status: String,
    score: i64,
    evaluated_at: Option<i64>,
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = ArenaError;

    fn try_from(row: PredictionRow) -> Result<Self> {
        let direction: Direction = row.direction.parse().map_err(|_| {
            ArenaError::Persistence(format!(
                "prediction {} has corrupt direction '{}'",
                row.id, row.direction
            ))
        })?;

        Ok(Prediction {
            id: Some(row.id),
            user_id: row.user_id,
            token_id: row.token_id,
            direction,
            created_at: row.created_at as Timestamp,
            expires_at: row.expires_at as Timestamp,
            status: row.status.parse()?,
            score: row.score,
            evaluated_at: row.evaluated_at.map(|t| t as Timestamp),
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    user_id: String,
    total_predictions: i64,
    correct_predictions: i64,
    total_score: i64,
    joined_at: i64,
    last_active: i64,
}

impl From<UserRow> for UserStats {
    fn from(row: UserRow) -> Self {
        UserStats {
            user_id: row.user_id,
            total_predictions: row.total_predictions.max(0) as u64,
            correct_predictions: row.correct_predictions.max(0) as u64,
            total_score: row.total_score,
            joined_at: row.joined_at as Timestamp,
            last_active: row.last_active as Timestamp,
        }
    }
}

/// SqliteLedger provides durable storage for predictions and user stats
pub struct SqliteLedger {
    pool: Pool<Sqlite>,
}

impl SqliteLedger {
    /// Connects to `url` and creates the schema if needed.
    ///
    /// A `:memory:` database is pinned to a single long-lived connection,
    /// since each SQLite connection would otherwise see its own empty
    /// database.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(persistence("Failed to connect to SQLite database"))?;

        Self::create_schema(&pool).await?;

        info!("SqliteLedger initialized and connected to {}", url);

        Ok(Self { pool })
    }

    /// Private in-memory database, mainly for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                token_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                score INTEGER NOT NULL DEFAULT 0,
                evaluated_at INTEGER
            );
            "#,
        )
        .execute(pool)
        .await
        .map_err(persistence("Failed to create predictions table"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_predictions_pending ON predictions (status, expires_at)",
        )
        .execute(pool)
        .await
        .map_err(persistence("Failed to create pending index"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_predictions_user ON predictions (user_id, created_at)",
        )
        .execute(pool)
        .await
        .map_err(persistence("Failed to create user index"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                total_predictions INTEGER NOT NULL DEFAULT 0,
                correct_predictions INTEGER NOT NULL DEFAULT 0,
                total_score INTEGER NOT NULL DEFAULT 0 CHECK (total_score >= 0),
                joined_at INTEGER NOT NULL,
                last_active INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .map_err(persistence("Failed to create users table"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_users_score ON users (total_score DESC, joined_at ASC)",
        )
        .execute(pool)
        .await
        .map_err(persistence("Failed to create score index"))?;

        Ok(())
    }

    /// Get a reference to the database pool
    pub fn get_db_pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl LedgerStorage for SqliteLedger {
    async fn insert_prediction(&self, prediction: &Prediction) -> Result<i64> {
        debug!(
            "Inserting prediction {} {} by {}",
            prediction.token_id, prediction.direction, prediction.user_id
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(persistence("Failed to begin transaction"))?;

        // 1. The prediction itself
        let id = sqlx::query(
            r#"
            INSERT INTO predictions (
                user_id, token_id, direction, created_at, expires_at, status, score, evaluated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&prediction.user_id)
        .bind(&prediction.token_id)
        .bind(prediction.direction.as_str())
        .bind(prediction.created_at as i64)
        .bind(prediction.expires_at as i64)
        .bind(prediction.status.as_str())
        .bind(prediction.score)
        .bind(prediction.evaluated_at.map(|t| t as i64))
        .execute(&mut *tx)
        .await
        .map_err(persistence("Failed to insert prediction"))?
        .last_insert_rowid();

        // 2. Lazily created user stats, bumped in the same transaction
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, total_predictions, correct_predictions, total_score, joined_at, last_active
            ) VALUES (?, 1, 0, 0, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                total_predictions = total_predictions + 1,
                last_active = MAX(last_active, excluded.last_active)
            "#,
        )
        .bind(&prediction.user_id)
        .bind(prediction.created_at as i64)
        .bind(prediction.created_at as i64)
        .execute(&mut *tx)
        .await
        .map_err(persistence("Failed to upsert user stats"))?;

        tx.commit()
            .await
            .map_err(persistence("Failed to commit prediction"))?;

        Ok(id)
    }

    async fn get_pending_expired(&self, now: Timestamp) -> Result<Vec<Prediction>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(
            r#"
            SELECT * FROM predictions
            WHERE status = 'pending' AND expires_at <= ?
            ORDER BY expires_at ASC, id ASC
            "#,
        )
        .bind(now as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence("Failed to fetch expired predictions"))?;

        rows.into_iter().map(Prediction::try_from).collect()
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

        debug!("Resolving prediction {} as {} ({:+})", prediction_id, new_status, score_delta);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(persistence("Failed to begin transaction"))?;

        // The status guard makes the transition happen at most once
        let resolved: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE predictions
            SET status = ?, score = ?, evaluated_at = ?
            WHERE id = ? AND status = 'pending'
            RETURNING user_id
            "#,
        )
        .bind(new_status.as_str())
        .bind(score_delta)
        .bind(now as i64)
        .bind(prediction_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(persistence("Failed to update prediction status"))?;

        let Some((user_id,)) = resolved else {
            tx.rollback()
                .await
                .map_err(persistence("Failed to roll back no-op resolution"))?;
            return Ok(false);
        };

        let correct_increment = i64::from(new_status == PredictionStatus::Correct);
        let updated = sqlx::query(
            r#"
            UPDATE users
            SET
                correct_predictions = correct_predictions + ?,
                total_score = MAX(0, total_score + ?),
                last_active = MAX(last_active, ?)
            WHERE user_id = ?
            "#,
        )
        .bind(correct_increment)
        .bind(score_delta)
        .bind(now as i64)
        .bind(&user_id)
        .execute(&mut *tx)
        .await
        .map_err(persistence("Failed to update user stats"))?;

        if updated.rows_affected() == 0 {
            warn!("Prediction {} resolved for user {} without a stats record", prediction_id, user_id);
        }

        tx.commit()
            .await
            .map_err(persistence("Failed to commit resolution"))?;

        Ok(true)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserStats>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("Failed to fetch user"))?;

        Ok(row.map(UserStats::from))
    }

    async fn get_prediction(&self, id: i64) -> Result<Option<Prediction>> {
        let row: Option<PredictionRow> = sqlx::query_as("SELECT * FROM predictions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("Failed to fetch prediction by ID"))?;

        row.map(Prediction::try_from).transpose()
    }

    async fn get_user_predictions(&self, user_id: &str, limit: usize) -> Result<Vec<Prediction>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(
            r#"
            SELECT * FROM predictions
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence("Failed to fetch user predictions"))?;

        rows.into_iter().map(Prediction::try_from).collect()
    }

    async fn rank_users(&self, limit: usize) -> Result<Vec<UserStats>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT * FROM users
            ORDER BY total_score DESC, joined_at ASC, user_id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence("Failed to rank users"))?;

        Ok(rows.into_iter().map(UserStats::from).collect())
    }

    async fn count_strictly_greater_score(&self, score: i64) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE total_score > ?")
            .bind(score)
            .fetch_one(&self.pool)
            .await
            .map_err(persistence("Failed to count higher scores"))?;

        Ok(count.0.max(0) as u64)
    }

    async fn aggregate_stats(&self) -> Result<LeaderboardStats> {
        let (users, total, correct): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(total_predictions), 0),
                COALESCE(SUM(correct_predictions), 0)
            FROM users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(persistence("Failed to aggregate leaderboard stats"))?;

        Ok(LeaderboardStats {
            total_users: users.max(0) as u64,
            total_predictions: total.max(0) as u64,
            correct_predictions: correct.max(0) as u64,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("SqliteLedger connection pool closed");
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
