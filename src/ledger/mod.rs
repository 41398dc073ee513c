//! Prediction lifecycle: storage, recording, scoring, evaluation and
//! rankings.

pub mod evaluation;
pub mod leaderboard;
pub mod memory_ledger;
pub mod prediction_ledger;
pub mod scoring;
pub mod sqlite_ledger;
pub mod storage;

pub use evaluation::{classify, EvaluationScheduler, SweepReport};
pub use leaderboard::LeaderboardRanker;
pub use memory_ledger::MemoryLedger;
pub use prediction_ledger::PredictionLedger;
pub use scoring::ScoringEngine;
pub use sqlite_ledger::SqliteLedger;
pub use storage::{open_storage, LedgerStorage};
