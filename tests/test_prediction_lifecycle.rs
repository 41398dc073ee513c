//! End-to-end prediction lifecycle: record, sweep, score, rank.

use alphascroll::ledger::{EvaluationScheduler, LedgerStorage, MemoryLedger, SqliteLedger};
use alphascroll::market::PriceResolver;
use alphascroll::{
    AlphaArena, ArenaBuilder, ArenaError, PredictionStatus, Result, StorageBackend, Timestamp,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;
const T0: u64 = 1_700_000_000_000;

/// Fixed price moves per token; unknown tokens resolve to `None`.
#[derive(Default)]
struct TableResolver {
    moves: Mutex<HashMap<String, Option<f64>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl TableResolver {
    fn with(moves: &[(&str, f64)]) -> Arc<Self> {
        let resolver = Self::default();
        resolver.set_all(moves);
        Arc::new(resolver)
    }

    fn slow(moves: &[(&str, f64)], delay: Duration) -> Arc<Self> {
        let resolver = Self {
            delay: Some(delay),
            ..Self::default()
        };
        resolver.set_all(moves);
        Arc::new(resolver)
    }

    fn set_all(&self, moves: &[(&str, f64)]) {
        let mut table = self.moves.lock().unwrap();
        for (token, pct) in moves {
            table.insert(token.to_string(), Some(*pct));
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceResolver for TableResolver {
    async fn price_change_since(&self, token_id: &str, _since: Timestamp) -> Result<Option<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.moves.lock().unwrap().get(token_id).copied().flatten())
    }
}

struct FailingResolver;

#[async_trait]
impl PriceResolver for FailingResolver {
    async fn price_change_since(&self, token_id: &str, _since: Timestamp) -> Result<Option<f64>> {
        Err(ArenaError::TransientFetch(format!("upstream down for {}", token_id)))
    }
}

async fn storages() -> Vec<Arc<dyn LedgerStorage>> {
    let sqlite = SqliteLedger::in_memory()
        .await
        .expect("Failed to create in-memory SQLite ledger");
    vec![Arc::new(sqlite), Arc::new(MemoryLedger::new())]
}

async fn arena(storage: Arc<dyn LedgerStorage>, resolver: Arc<dyn PriceResolver>) -> AlphaArena {
    ArenaBuilder::new()
        .with_storage(storage)
        .build(resolver)
        .await
        .expect("Failed to build arena")
}

#[tokio::test]
async fn test_correct_moon_call_scores_thirty() {
    for storage in storages().await {
        let name = storage.backend_name();
        let arena = arena(storage, TableResolver::with(&[("btc", 20.0)])).await;

        let prediction = arena.record_prediction("alice", "btc", "moon", T0).await.unwrap();
        assert_eq!(prediction.expires_at, T0 + DAY_MS);

        let report = arena.run_evaluation_tick(T0 + DAY_MS).await.unwrap();
        assert_eq!(report.candidates, 1, "{}", name);
        assert_eq!(report.resolved_correct, 1, "{}", name);

        let stored = arena
            .storage()
            .get_prediction(prediction.id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PredictionStatus::Correct);
        assert_eq!(stored.score, 30);
        assert_eq!(stored.evaluated_at, Some(T0 + DAY_MS));

        let user = arena.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.total_predictions, 1, "{}", name);
        assert_eq!(user.correct_predictions, 1, "{}", name);
        assert_eq!(user.total_score, 30, "{}", name);
        assert_eq!(arena.get_user_rank("alice").await.unwrap(), Some(1));
    }
}

#[tokio::test]
async fn test_wrong_call_is_penalised_and_total_clamped() {
    for storage in storages().await {
        let name = storage.backend_name();
        let arena = arena(storage, TableResolver::with(&[("btc", -3.0)])).await;

        let prediction = arena.record_prediction("bob", "btc", "up", T0).await.unwrap();
        let report = arena.run_evaluation_tick(T0 + DAY_MS).await.unwrap();
        assert_eq!(report.resolved_incorrect, 1, "{}", name);

        let stored = arena
            .storage()
            .get_prediction(prediction.id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PredictionStatus::Incorrect);
        assert_eq!(stored.score, -10);

        let user = arena.get_user("bob").await.unwrap().unwrap();
        assert_eq!(user.total_score, 0, "{}", name);
        assert_eq!(user.correct_predictions, 0, "{}", name);
    }
}

#[tokio::test]
async fn test_moon_below_threshold_is_incorrect() {
    for storage in storages().await {
        let arena = arena(storage, TableResolver::with(&[("eth", 14.9)])).await;
        arena.record_prediction("carol", "eth", "moon", T0).await.unwrap();

        let report = arena.run_evaluation_tick(T0 + DAY_MS).await.unwrap();
        assert_eq!(report.resolved_incorrect, 1);
    }
}

#[tokio::test]
async fn test_unknown_price_stays_pending_until_known() {
    for storage in storages().await {
        let name = storage.backend_name();
        let resolver = TableResolver::with(&[]);
        let arena = arena(storage, resolver.clone()).await;

        let prediction = arena.record_prediction("dave", "pepe", "down", T0).await.unwrap();
        let id = prediction.id.unwrap();

        let report = arena.run_evaluation_tick(T0 + DAY_MS).await.unwrap();
        assert_eq!(report.unresolved, 1, "{}", name);
        let stored = arena.storage().get_prediction(id).await.unwrap().unwrap();
        assert_eq!(stored.status, PredictionStatus::Pending);

        // Unknown outcomes are not cached; the next sweep asks again.
        resolver.set_all(&[("pepe", -8.0)]);
        let report = arena.run_evaluation_tick(T0 + DAY_MS + HOUR_MS).await.unwrap();
        assert_eq!(report.candidates, 1, "{}", name);
        assert_eq!(report.resolved_correct, 1, "{}", name);
        assert_eq!(resolver.calls(), 2, "{}", name);

        let user = arena.get_user("dave").await.unwrap().unwrap();
        assert_eq!(user.total_score, 15, "{}", name);
    }
}

#[tokio::test]
async fn test_failing_resolver_leaves_predictions_pending() {
    for storage in storages().await {
        let arena = arena(storage, Arc::new(FailingResolver)).await;
        arena.record_prediction("erin", "btc", "up", T0).await.unwrap();
        arena.record_prediction("erin", "eth", "dump", T0).await.unwrap();

        let report = arena.run_evaluation_tick(T0 + DAY_MS).await.unwrap();
        assert_eq!(report.candidates, 2);
        assert_eq!(report.unresolved, 2);
        assert_eq!(report.resolved(), 0);

        let still_pending = arena.storage().get_pending_expired(T0 + DAY_MS).await.unwrap();
        assert_eq!(still_pending.len(), 2);
    }
}

#[tokio::test]
async fn test_predictions_before_deadline_are_not_evaluated() {
    for storage in storages().await {
        let resolver = TableResolver::with(&[("btc", 5.0)]);
        let arena = arena(storage, resolver.clone()).await;
        arena.record_prediction("frank", "btc", "up", T0).await.unwrap();

        let report = arena.run_evaluation_tick(T0 + DAY_MS - 1).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(resolver.calls(), 0);
    }
}

#[tokio::test]
async fn test_sideways_direction_is_rejected_without_side_effects() {
    for storage in storages().await {
        let arena = arena(storage, TableResolver::with(&[])).await;

        let result = arena.record_prediction("grace", "btc", "sideways", T0).await;
        assert!(matches!(result, Err(ArenaError::Validation(_))));

        assert!(arena.get_user("grace").await.unwrap().is_none());
        let stats = arena.get_leaderboard_stats().await.unwrap();
        assert_eq!(stats.total_predictions, 0);
        assert_eq!(stats.total_users, 0);
    }
}

#[tokio::test]
async fn test_concurrent_sweeps_resolve_once() {
    for storage in storages().await {
        let name = storage.backend_name();
        let resolver = TableResolver::slow(&[("btc", 25.0)], Duration::from_millis(100));
        let arena = arena(storage, resolver.clone()).await;
        arena.record_prediction("heidi", "btc", "moon", T0).await.unwrap();

        let now = T0 + DAY_MS;
        let (first, second) = tokio::join!(arena.run_evaluation_tick(now), arena.run_evaluation_tick(now));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.resolved() + second.resolved(), 1, "{}", name);
        assert_eq!(resolver.calls(), 1, "{}: lookups are deduplicated", name);

        let user = arena.get_user("heidi").await.unwrap().unwrap();
        assert_eq!(user.correct_predictions, 1, "{}", name);
        assert_eq!(user.total_score, 30, "{}", name);
    }
}

#[tokio::test]
async fn test_resolver_timeout_is_unknown_outcome() {
    let storage: Arc<dyn LedgerStorage> = Arc::new(MemoryLedger::new());
    let resolver = TableResolver::slow(&[("btc", 5.0)], Duration::from_millis(300));
    let config = ArenaBuilder::new().build_config();
    let scheduler = EvaluationScheduler::new(storage.clone(), resolver, &config)
        .with_resolver_timeout(Duration::from_millis(20));

    let arena = ArenaBuilder::new()
        .with_storage(storage.clone())
        .build(TableResolver::with(&[]))
        .await
        .unwrap();
    arena.record_prediction("ivan", "btc", "up", T0).await.unwrap();

    let report = scheduler.run_tick(T0 + DAY_MS).await.unwrap();
    assert_eq!(report.unresolved, 1);
    assert_eq!(storage.get_pending_expired(T0 + DAY_MS).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_shorter_window_earns_smaller_bonus() {
    for storage in storages().await {
        let arena = arena(storage, TableResolver::with(&[("sol", -30.0)])).await;
        let prediction = arena
            .record_prediction_with_window("judy", "sol", "dump", T0, Duration::from_secs(12 * 60 * 60))
            .await
            .unwrap();
        assert_eq!(prediction.expires_at, T0 + 12 * HOUR_MS);

        arena.run_evaluation_tick(T0 + 12 * HOUR_MS).await.unwrap();
        let user = arena.get_user("judy").await.unwrap().unwrap();
        assert_eq!(user.total_score, 27);
    }
}

#[tokio::test]
async fn test_rankings_after_sweep() {
    for storage in storages().await {
        let name = storage.backend_name();
        let arena = arena(storage, TableResolver::with(&[("btc", 20.0), ("eth", 2.0)])).await;

        arena.record_prediction("alice", "btc", "moon", T0).await.unwrap();
        arena.record_prediction("bob", "eth", "up", T0 + 1).await.unwrap();
        arena.record_prediction("carol", "btc", "up", T0 + 2).await.unwrap();
        arena.record_prediction("dan", "eth", "down", T0 + 3).await.unwrap();

        arena.run_evaluation_tick(T0 + DAY_MS + 10).await.unwrap();

        let board: Vec<(u64, String, i64)> = arena
            .get_leaderboard(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.rank, r.stats.user_id, r.stats.total_score))
            .collect();
        assert_eq!(
            board,
            vec![
                (1, "alice".to_string(), 30),
                (2, "bob".to_string(), 15),
                (3, "carol".to_string(), 15),
                (4, "dan".to_string(), 0),
            ],
            "{}",
            name
        );

        assert_eq!(arena.get_user_rank("bob").await.unwrap(), Some(2));
        assert_eq!(arena.get_user_rank("carol").await.unwrap(), Some(2));
        assert_eq!(arena.get_user_rank("dan").await.unwrap(), Some(4));
        assert_eq!(arena.get_user_rank("zed").await.unwrap(), None);

        let stats = arena.get_leaderboard_stats().await.unwrap();
        assert_eq!(stats.total_users, 4);
        assert_eq!(stats.correct_predictions, 3);
        assert_eq!(stats.overall_accuracy_percent(), Some(75.0));
    }
}

#[tokio::test]
async fn test_user_history_is_normalised_and_newest_first() {
    for storage in storages().await {
        let arena = arena(storage, TableResolver::with(&[])).await;
        arena.record_prediction(" Kim ", " BTC ", "UP", T0).await.unwrap();
        arena.record_prediction("kim", "eth", "Dump", T0 + 5).await.unwrap();

        let history = arena.get_user_predictions("KIM", 10).await.unwrap();
        let tokens: Vec<&str> = history.iter().map(|p| p.token_id.as_str()).collect();
        assert_eq!(tokens, vec!["eth", "btc"]);
        assert_eq!(arena.get_user("Kim").await.unwrap().unwrap().total_predictions, 2);
    }
}

#[tokio::test]
async fn test_spawned_scheduler_sweeps_and_stops() {
    let arena = ArenaBuilder::new()
        .with_storage_backend(StorageBackend::Memory)
        .with_evaluation_interval(3600)
        .build(TableResolver::with(&[("btc", 1.0)]))
        .await
        .unwrap();

    // Already expired, so the scheduler's first tick resolves it.
    arena
        .record_prediction("lena", "btc", "up", alphascroll::types::now_millis() - DAY_MS)
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = arena.spawn_scheduler(shutdown_rx);

    let mut resolved = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if arena.get_user("lena").await.unwrap().unwrap().correct_predictions == 1 {
            resolved = true;
            break;
        }
    }
    assert!(resolved, "first tick should run immediately");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
