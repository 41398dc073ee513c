//! EvaluationScheduler: periodic resolution of expired predictions.
//!
//! Each sweep loads the pending predictions whose deadline has passed,
//! resolves the token's price move through a [`PriceResolver`] (cached per
//! `(token, created_at)`), scores the outcome and writes prediction and user
//! stats back in one atomic step. Candidates are isolated from each other: an
//! unresolvable price or a failed write affects only that candidate, which
//! stays pending and is offered again next sweep.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ArenaConfig;
use crate::error::{ArenaError, Result};
use crate::ledger::scoring::ScoringEngine;
use crate::ledger::storage::LedgerStorage;
use crate::market::cache::TtlCache;
use crate::market::resolver::PriceResolver;
use crate::market::service::with_timeout;
use crate::types::{now_millis, Direction, Prediction, PredictionStatus, Timestamp};

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub resolved_correct: usize,
    pub resolved_incorrect: usize,
    /// Price unknown this sweep; left pending.
    pub unresolved: usize,
    /// Resolved concurrently by someone else.
    pub already_resolved: usize,
    /// Write failed; left pending.
    pub failed: usize,
}

impl SweepReport {
    pub fn resolved(&self) -> usize {
        self.resolved_correct + self.resolved_incorrect
    }

    fn record(&mut self, outcome: CandidateOutcome) {
        match outcome {
            CandidateOutcome::Correct => self.resolved_correct += 1,
            CandidateOutcome::Incorrect => self.resolved_incorrect += 1,
            CandidateOutcome::Unresolved => self.unresolved += 1,
            CandidateOutcome::AlreadyResolved => self.already_resolved += 1,
            CandidateOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateOutcome {
    Correct,
    Incorrect,
    Unresolved,
    AlreadyResolved,
    Failed,
}

/// Whether a price move of `pct` percent confirms `direction`.
pub fn classify(direction: Direction, pct: f64, moon_threshold: f64) -> bool {
    match direction {
        Direction::Up => pct > 0.0,
        Direction::Down => pct < 0.0,
        Direction::Moon => pct >= moon_threshold,
        Direction::Dump => pct <= -moon_threshold,
    }
}

pub struct EvaluationScheduler {
    storage: Arc<dyn LedgerStorage>,
    resolver: Arc<dyn PriceResolver>,
    price_cache: TtlCache<(String, Timestamp), f64>,
    scoring: ScoringEngine,
    moon_threshold: f64,
    interval: Duration,
    resolver_timeout: Duration,
    cache_ttl: Duration,
    max_parallel: usize,
}

impl EvaluationScheduler {
    pub fn new(
        storage: Arc<dyn LedgerStorage>,
        resolver: Arc<dyn PriceResolver>,
        config: &ArenaConfig,
    ) -> Self {
        Self {
            storage,
            resolver,
            price_cache: TtlCache::new(config.max_cache_entries as u64),
            scoring: ScoringEngine::new(config.prediction_window()),
            moon_threshold: config.moon_threshold_percent,
            interval: config.evaluation_interval().max(Duration::from_millis(1)),
            resolver_timeout: config.resolver_timeout(),
            cache_ttl: config.cache_ttl(),
            max_parallel: config.max_parallel_evaluations.max(1),
        }
    }

    /// Overrides the per-lookup resolver budget.
    pub fn with_resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolver_timeout = timeout;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep over every pending prediction expired at `now`.
    ///
    /// Only loading the candidate set can fail; per-candidate problems are
    /// counted in the report.
    pub async fn run_tick(&self, now: Timestamp) -> Result<SweepReport> {
        let candidates = self.storage.get_pending_expired(now).await?;
        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };
        if candidates.is_empty() {
            debug!("No expired predictions to evaluate");
            return Ok(report);
        }

        info!("Evaluating {} expired predictions", report.candidates);
        let outcomes: Vec<CandidateOutcome> = stream::iter(candidates)
            .map(|candidate| async move { self.evaluate(&candidate, now).await })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }

        info!(
            "Sweep complete: {} correct, {} incorrect, {} unresolved, {} failed",
            report.resolved_correct, report.resolved_incorrect, report.unresolved, report.failed
        );
        Ok(report)
    }

    async fn evaluate(&self, candidate: &Prediction, now: Timestamp) -> CandidateOutcome {
        let Some(id) = candidate.id else {
            warn!("Skipping stored prediction without an id");
            return CandidateOutcome::Failed;
        };

        let pct = match self.price_change(candidate).await {
            Ok(pct) => pct,
            Err(e) => {
                debug!(
                    "Prediction {} on {} unresolved this sweep: {}",
                    id, candidate.token_id, e
                );
                return CandidateOutcome::Unresolved;
            }
        };

        let correct = classify(candidate.direction, pct, self.moon_threshold);
        let delta = self.scoring.compute_score(candidate, correct);
        let status = if correct {
            PredictionStatus::Correct
        } else {
            PredictionStatus::Incorrect
        };

        match self
            .storage
            .update_prediction_and_user(id, status, delta, now)
            .await
        {
            Ok(true) => {
                info!(
                    "Prediction {} by {}: {} {} moved {:.2}% -> {} ({:+})",
                    id,
                    candidate.user_id,
                    candidate.token_id,
                    candidate.direction,
                    pct,
                    status,
                    delta
                );
                if correct {
                    CandidateOutcome::Correct
                } else {
                    CandidateOutcome::Incorrect
                }
            }
            Ok(false) => {
                debug!("Prediction {} was already resolved", id);
                CandidateOutcome::AlreadyResolved
            }
            Err(e) => {
                error!("Failed to store outcome of prediction {}: {}", id, e);
                CandidateOutcome::Failed
            }
        }
    }

    /// Cached price move since the prediction was made. An unknown price is
    /// an error here so the cache does not remember it.
    async fn price_change(&self, candidate: &Prediction) -> Result<f64> {
        let key = (candidate.token_id.clone(), candidate.created_at);
        self.price_cache
            .get(key, self.cache_ttl, || async {
                let change = with_timeout(
                    self.resolver_timeout,
                    "price resolution",
                    self.resolver
                        .price_change_since(&candidate.token_id, candidate.created_at),
                )
                .await?;

                match change {
                    Some(pct) if pct.is_finite() => Ok(pct),
                    _ => Err(ArenaError::NotFound(format!(
                        "no price history for {}",
                        candidate.token_id
                    ))),
                }
            })
            .await
    }

    /// Sweeps on every interval tick until `shutdown` flips to `true` or its
    /// sender is dropped. A sweep in progress is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "EvaluationScheduler is running. Sweep every {} seconds.",
            self.interval.as_secs()
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_tick(now_millis()).await {
                        error!("Evaluation sweep failed, retrying next tick: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("EvaluationScheduler stopped");
    }
}

/// Spawns `scheduler.run` on the runtime.
pub fn spawn_scheduler(
    scheduler: Arc<EvaluationScheduler>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { scheduler.run(shutdown).await })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_directional() {
        assert!(classify(Direction::Up, 0.1, 15.0));
        assert!(!classify(Direction::Up, 0.0, 15.0));
        assert!(classify(Direction::Down, -0.1, 15.0));
        assert!(!classify(Direction::Down, 0.0, 15.0));
    }

    #[test]
    fn test_classify_extreme_thresholds_are_inclusive() {
        assert!(classify(Direction::Moon, 15.0, 15.0));
        assert!(!classify(Direction::Moon, 14.99, 15.0));
        assert!(classify(Direction::Dump, -15.0, 15.0));
        assert!(!classify(Direction::Dump, -3.0, 15.0));
    }

    #[test]
    fn test_report_totals() {
        let mut report = SweepReport::default();
        report.record(CandidateOutcome::Correct);
        report.record(CandidateOutcome::Incorrect);
        report.record(CandidateOutcome::Unresolved);
        assert_eq!(report.resolved(), 2);
        assert_eq!(report.unresolved, 1);
    }
}
