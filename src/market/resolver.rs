//! Price-resolution collaborator used by the evaluation sweep.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Timestamp;

/// Resolves how a token's price moved since a point in time.
#[async_trait]
pub trait PriceResolver: Send + Sync {
    /// Percentage change of `token_id` between `since` and now.
    ///
    /// `Ok(None)` means the price cannot be resolved (unknown token or no
    /// history yet). Errors are transient and retried on a later sweep.
    async fn price_change_since(&self, token_id: &str, since: Timestamp) -> Result<Option<f64>>;
}
