//! Composition root: owns the store and wires the ledger components.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{ArenaConfig, StorageBackend};
use crate::error::{ArenaError, Result};
use crate::ledger::evaluation::{self, EvaluationScheduler, SweepReport};
use crate::ledger::leaderboard::LeaderboardRanker;
use crate::ledger::prediction_ledger::PredictionLedger;
use crate::ledger::storage::{open_storage, LedgerStorage};
use crate::market::resolver::PriceResolver;
use crate::types::{LeaderboardStats, Prediction, RankedUser, Timestamp, UserStats};

/// The prediction arena: record calls, resolve them, rank the callers.
pub struct AlphaArena {
    config: ArenaConfig,
    storage: Arc<dyn LedgerStorage>,
    ledger: PredictionLedger,
    ranker: LeaderboardRanker,
    scheduler: Arc<EvaluationScheduler>,
}

impl AlphaArena {
    /// Opens the configured store and wires the components around it.
    pub async fn open(config: ArenaConfig, resolver: Arc<dyn PriceResolver>) -> Result<Self> {
        let storage = open_storage(&config).await?;
        Ok(Self::with_storage(config, storage, resolver))
    }

    /// Wires the components around an already opened store.
    pub fn with_storage(
        config: ArenaConfig,
        storage: Arc<dyn LedgerStorage>,
        resolver: Arc<dyn PriceResolver>,
    ) -> Self {
        let ledger = PredictionLedger::new(storage.clone(), config.prediction_window());
        let ranker = LeaderboardRanker::new(storage.clone(), config.leaderboard_size);
        let scheduler = Arc::new(EvaluationScheduler::new(storage.clone(), resolver, &config));

        info!(
            "Prediction arena ready on {} storage ({}h window)",
            storage.backend_name(),
            config.prediction_window_hours
        );
        Self {
            config,
            storage,
            ledger,
            ranker,
            scheduler,
        }
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn LedgerStorage> {
        self.storage.clone()
    }

    /// Records a call that resolves after the full prediction window.
    pub async fn record_prediction(
        &self,
        user_id: &str,
        token_id: &str,
        direction: &str,
        now: Timestamp,
    ) -> Result<Prediction> {
        self.ledger.record(user_id, token_id, direction, now).await
    }

    /// Records a call with a shorter window, which earns a smaller bonus.
    pub async fn record_prediction_with_window(
        &self,
        user_id: &str,
        token_id: &str,
        direction: &str,
        now: Timestamp,
        window: Duration,
    ) -> Result<Prediction> {
        self.ledger
            .record_with_window(user_id, token_id, direction, now, window)
            .await
    }

    pub async fn get_leaderboard(&self, limit: usize) -> Result<Vec<RankedUser>> {
        self.ranker.top_n(limit).await
    }

    pub async fn get_user_rank(&self, user_id: &str) -> Result<Option<u64>> {
        self.ranker.rank_of(user_id).await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserStats>> {
        self.storage.get_user(&user_id.trim().to_lowercase()).await
    }

    /// A user's predictions, newest first.
    pub async fn get_user_predictions(&self, user_id: &str, limit: usize) -> Result<Vec<Prediction>> {
        self.storage
            .get_user_predictions(&user_id.trim().to_lowercase(), limit)
            .await
    }

    pub async fn get_leaderboard_stats(&self) -> Result<LeaderboardStats> {
        self.ranker.stats().await
    }

    /// Runs one evaluation sweep at `now`.
    pub async fn run_evaluation_tick(&self, now: Timestamp) -> Result<SweepReport> {
        self.scheduler.run_tick(now).await
    }

    /// Starts the periodic sweep. It stops once `shutdown` carries `true`.
    pub fn spawn_scheduler(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        evaluation::spawn_scheduler(self.scheduler.clone(), shutdown)
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.storage.health_check().await
    }

    /// Releases the store. Calls made afterwards fail with a persistence
    /// error.
    pub async fn close(&self) {
        info!("Closing {} ledger", self.storage.backend_name());
        self.storage.close().await;
    }
}

/// Builder for [`AlphaArena`] with sensible defaults.
pub struct ArenaBuilder {
    config: ArenaConfig,
    storage: Option<Arc<dyn LedgerStorage>>,
}

impl ArenaBuilder {
    pub fn new() -> Self {
        Self {
            config: ArenaConfig::default(),
            storage: None,
        }
    }

    /// Starts from a loaded configuration.
    pub fn with_config(mut self, config: ArenaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_storage_backend(mut self, backend: StorageBackend) -> Self {
        self.config.storage = backend;
        self
    }

    /// Uses an already opened store instead of opening one from config.
    pub fn with_storage(mut self, storage: Arc<dyn LedgerStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_fallback_to_memory(mut self, enabled: bool) -> Self {
        self.config.fallback_to_memory = enabled;
        self
    }

    pub fn with_prediction_window_hours(mut self, hours: u64) -> Self {
        self.config.prediction_window_hours = hours;
        self
    }

    pub fn with_moon_threshold(mut self, percent: f64) -> Self {
        self.config.moon_threshold_percent = percent;
        self
    }

    pub fn with_evaluation_interval(mut self, seconds: u64) -> Self {
        self.config.evaluation_interval_secs = seconds;
        self
    }

    pub fn with_resolver_timeout(mut self, seconds: u64) -> Self {
        self.config.resolver_timeout_secs = seconds;
        self
    }

    pub fn with_max_parallel_evaluations(mut self, max: usize) -> Self {
        self.config.max_parallel_evaluations = max;
        self
    }

    /// Set cache TTL in seconds.
    pub fn with_cache_ttl(mut self, ttl_seconds: u64) -> Self {
        self.config.cache_ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_max_cache_entries(mut self, max_entries: usize) -> Self {
        self.config.max_cache_entries = max_entries;
        self
    }

    pub fn with_leaderboard_size(mut self, size: usize) -> Self {
        self.config.leaderboard_size = size;
        self
    }

    pub fn with_coingecko_api_key(mut self, key: Option<String>) -> Self {
        self.config.coingecko_api_key = key;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.rate_limit_requests_per_second = requests_per_second;
        self
    }

    pub fn build_config(self) -> ArenaConfig {
        self.config
    }

    /// Validates the configuration, opens storage and wires the arena.
    pub async fn build(self, resolver: Arc<dyn PriceResolver>) -> Result<AlphaArena> {
        self.config
            .validate()
            .map_err(|e| ArenaError::Validation(format!("{:#}", e)))?;

        match self.storage {
            Some(storage) => Ok(AlphaArena::with_storage(self.config, storage, resolver)),
            None => AlphaArena::open(self.config, resolver).await,
        }
    }
}

impl Default for ArenaBuilder {
    fn default() -> Self {
        Self::new()
    }
}
