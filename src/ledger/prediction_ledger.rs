//! Recording of new predictions.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{ArenaError, Result};
use crate::ledger::storage::LedgerStorage;
use crate::types::{Direction, Prediction, PredictionStatus, Timestamp};

/// Validates and persists predictions.
#[derive(Clone)]
pub struct PredictionLedger {
    storage: Arc<dyn LedgerStorage>,
    window: Duration,
}

impl PredictionLedger {
    pub fn new(storage: Arc<dyn LedgerStorage>, window: Duration) -> Self {
        Self { storage, window }
    }

    /// Configured full prediction window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a prediction with the full window.
    ///
    /// `direction` is parsed case-insensitively. Identifiers are trimmed and
    /// lower-cased before storage.
    pub async fn record(
        &self,
        user_id: &str,
        token_id: &str,
        direction: &str,
        now: Timestamp,
    ) -> Result<Prediction> {
        self.record_with_window(user_id, token_id, direction, now, self.window)
            .await
    }

    /// Records a prediction that resolves after `window`, which must lie in
    /// `(0, full window]`.
    pub async fn record_with_window(
        &self,
        user_id: &str,
        token_id: &str,
        direction: &str,
        now: Timestamp,
        window: Duration,
    ) -> Result<Prediction> {
        let direction: Direction = direction.parse()?;
        let user_id = normalize_id(user_id, "user id")?;
        let token_id = normalize_id(token_id, "token id")?;

        if window.is_zero() || window > self.window {
            return Err(ArenaError::Validation(format!(
                "prediction window must be between 0 and {}h",
                self.window.as_secs() / 3600
            )));
        }

        let expires_at = u64::try_from(window.as_millis())
            .ok()
            .and_then(|window_ms| now.checked_add(window_ms))
            .ok_or_else(|| {
                ArenaError::Validation(format!("prediction deadline overflows from {}", now))
            })?;

        let mut prediction = Prediction {
            id: None,
            user_id,
            token_id,
            direction,
            created_at: now,
            expires_at,
            status: PredictionStatus::Pending,
            score: 0,
            evaluated_at: None,
        };

        let id = self.storage.insert_prediction(&prediction).await?;
        prediction.id = Some(id);

        info!(
            "Recorded prediction {}: {} {} by {}",
            id, prediction.token_id, prediction.direction, prediction.user_id
        );
        Ok(prediction)
    }
}

fn normalize_id(raw: &str, what: &str) -> Result<String> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        Err(ArenaError::Validation(format!("{} must not be empty", what)))
    } else {
        Ok(normalized)
    }
}
