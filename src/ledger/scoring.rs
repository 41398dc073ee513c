//! Point calculation for resolved predictions.

use std::time::Duration;

use crate::types::{Direction, Prediction};

/// Base points for up / down calls.
pub const DIRECTIONAL_BASE_SCORE: i64 = 10;
/// Base points for moon / dump calls.
pub const EXTREME_BASE_SCORE: i64 = 25;
/// Bonus earned by a prediction made with the full window.
pub const MAX_TIME_BONUS: i64 = 5;
/// Flat penalty for a wrong call, whatever the tier.
pub const INCORRECT_PENALTY: i64 = -10;

/// Pure scoring rules. Clamping of user totals is the store's job.
#[derive(Debug, Clone, Copy)]
pub struct ScoringEngine {
    full_window_millis: u64,
}

impl ScoringEngine {
    pub fn new(full_window: Duration) -> Self {
        Self {
            full_window_millis: full_window.as_millis() as u64,
        }
    }

    /// Base points by risk tier.
    pub fn base_score(direction: Direction) -> i64 {
        if direction.is_extreme() {
            EXTREME_BASE_SCORE
        } else {
            DIRECTIONAL_BASE_SCORE
        }
    }

    /// `floor(window / full_window * 5)`, capped at the maximum bonus.
    pub fn time_bonus(&self, prediction: &Prediction) -> i64 {
        if self.full_window_millis == 0 {
            return 0;
        }
        let window = prediction.window_millis() as u128;
        let bonus = window * MAX_TIME_BONUS as u128 / self.full_window_millis as u128;
        (bonus as i64).min(MAX_TIME_BONUS)
    }

    /// Score delta for a resolved prediction.
    pub fn compute_score(&self, prediction: &Prediction, outcome_correct: bool) -> i64 {
        if outcome_correct {
            Self::base_score(prediction.direction) + self.time_bonus(prediction)
        } else {
            INCORRECT_PENALTY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PredictionStatus;

    const HOUR: u64 = 60 * 60 * 1000;

    fn engine() -> ScoringEngine {
        ScoringEngine::new(Duration::from_millis(24 * HOUR))
    }

    fn prediction(direction: Direction, window: u64) -> Prediction {
        Prediction {
            id: Some(1),
            user_id: "alice".to_string(),
            token_id: "bitcoin".to_string(),
            direction,
            created_at: 1_000,
            expires_at: 1_000 + window,
            status: PredictionStatus::Pending,
            score: 0,
            evaluated_at: None,
        }
    }

    #[test]
    fn test_correct_directional_call() {
        let p = prediction(Direction::Up, 24 * HOUR);
        assert_eq!(engine().compute_score(&p, true), 15);
    }

    #[test]
    fn test_correct_moon_call() {
        let p = prediction(Direction::Moon, 24 * HOUR);
        assert_eq!(engine().compute_score(&p, true), 30);
    }

    #[test]
    fn test_incorrect_call_is_flat_penalty() {
        for direction in Direction::all() {
            let p = prediction(direction, 24 * HOUR);
            assert_eq!(engine().compute_score(&p, false), -10);
        }
    }

    #[test]
    fn test_shorter_window_earns_smaller_bonus() {
        let half = prediction(Direction::Dump, 12 * HOUR);
        assert_eq!(engine().time_bonus(&half), 2);
        assert_eq!(engine().compute_score(&half, true), 27);

        let tiny = prediction(Direction::Down, HOUR);
        assert_eq!(engine().time_bonus(&tiny), 0);
        assert_eq!(engine().compute_score(&tiny, true), 10);
    }
}
