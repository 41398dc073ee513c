//! Throttled JSON fetching with retries, shared by the upstream clients.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, instrument, warn};

use crate::error::{ArenaError, Result};
use crate::market::rate_limit::RequestThrottle;

/// Upstreams mix numbers and numeric strings ("1,234.5") across fields.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    })
}

/// GET-only JSON client bound to one base URL.
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    auth_header: Option<(&'static str, String)>,
    throttle: RequestThrottle,
    retry_attempts: usize,
}

impl UpstreamClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        requests_per_second: u32,
        retry_attempts: usize,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("alphascroll/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: None,
            throttle: RequestThrottle::per_second(requests_per_second),
            retry_attempts,
        })
    }

    /// Sends `name: value` with every request.
    pub fn with_auth_header(mut self, name: &'static str, value: String) -> Self {
        self.auth_header = Some((name, value));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches and decodes `path`, retrying transient failures with
    /// exponential backoff. A 404 is reported as `NotFound` at once.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        RetryIf::start(
            retry_strategy,
            || self.fetch_json(path, query),
            |e: &ArenaError| {
                if e.is_retryable() {
                    warn!("Retrying {} after error: {}", path, e);
                }
                e.is_retryable()
            },
        )
        .await
    }

    #[instrument(skip(self, query), fields(base = %self.base_url))]
    async fn fetch_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.throttle.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url).query(query);
        if let Some((name, value)) = &self.auth_header {
            request = request.header(*name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ArenaError::NotFound(format!("{} returned 404", path)));
        }
        if !status.is_success() {
            return Err(ArenaError::TransientFetch(format!(
                "{} returned HTTP {}",
                path, status
            )));
        }

        let body = response.json::<T>().await?;
        debug!("Fetched {}", path);
        Ok(body)
    }
}
