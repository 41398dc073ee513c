//! Core types and data structures for the AlphaScroll prediction arena.

use crate::error::ArenaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

/// Current wall-clock time as a [`Timestamp`].
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Direction of a price call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Price ends above the starting price
    Up,
    /// Price ends below the starting price
    Down,
    /// Price rises by at least the moon threshold
    Moon,
    /// Price falls by at least the moon threshold
    Dump,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Moon => "moon",
            Direction::Dump => "dump",
        }
    }

    /// Extreme-move calls sit in the higher risk tier.
    pub fn is_extreme(&self) -> bool {
        matches!(self, Direction::Moon | Direction::Dump)
    }

    pub fn all() -> [Direction; 4] {
        [Direction::Up, Direction::Down, Direction::Moon, Direction::Dump]
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "moon" => Ok(Direction::Moon),
            "dump" => Ok(Direction::Dump),
            other => Err(ArenaError::Validation(format!(
                "unknown direction '{}', expected one of up, down, moon, dump",
                other
            ))),
        }
    }
}

/// Lifecycle state of a prediction. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Pending,
    Correct,
    Incorrect,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Pending => "pending",
            PredictionStatus::Correct => "correct",
            PredictionStatus::Incorrect => "incorrect",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, PredictionStatus::Pending)
    }
}

impl Default for PredictionStatus {
    fn default() -> Self {
        PredictionStatus::Pending
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionStatus {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PredictionStatus::Pending),
            "correct" => Ok(PredictionStatus::Correct),
            "incorrect" => Ok(PredictionStatus::Incorrect),
            other => Err(ArenaError::Persistence(format!(
                "unrecognised prediction status '{}'",
                other
            ))),
        }
    }
}

/// A single directional call made by a user on a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Store-assigned identifier (None until persisted)
    pub id: Option<i64>,
    /// Normalised (lower-case) user identifier
    pub user_id: String,
    /// Normalised (lower-case) token identifier
    pub token_id: String,
    pub direction: Direction,
    pub created_at: Timestamp,
    /// Resolution deadline, `created_at + window`
    pub expires_at: Timestamp,
    pub status: PredictionStatus,
    /// Score delta applied on resolution (0 while pending)
    pub score: i64,
    /// When the prediction left `Pending`
    pub evaluated_at: Option<Timestamp>,
}

impl Prediction {
    /// Window the prediction was made with.
    pub fn window_millis(&self) -> u64 {
        self.expires_at.saturating_sub(self.created_at)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Aggregate statistics for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub total_predictions: u64,
    pub correct_predictions: u64,
    /// Never negative; clamped at zero by the store
    pub total_score: i64,
    pub joined_at: Timestamp,
    pub last_active: Timestamp,
}

impl UserStats {
    /// Fresh record with zeroed counters.
    pub fn new(user_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            user_id: user_id.into(),
            total_predictions: 0,
            correct_predictions: 0,
            total_score: 0,
            joined_at: now,
            last_active: now,
        }
    }

    /// Fraction of predictions judged correct, `None` before the first one.
    pub fn accuracy(&self) -> Option<f64> {
        if self.total_predictions == 0 {
            None
        } else {
            Some(self.correct_predictions as f64 / self.total_predictions as f64)
        }
    }
}

/// Leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedUser {
    /// 1-based position on the board
    pub rank: u64,
    #[serde(flatten)]
    pub stats: UserStats,
}

/// Arena-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardStats {
    pub total_users: u64,
    pub total_predictions: u64,
    pub correct_predictions: u64,
}

impl LeaderboardStats {
    /// Overall accuracy in percent, `None` when nothing was predicted yet.
    pub fn overall_accuracy_percent(&self) -> Option<f64> {
        if self.total_predictions == 0 {
            None
        } else {
            Some(self.correct_predictions as f64 / self.total_predictions as f64 * 100.0)
        }
    }
}
