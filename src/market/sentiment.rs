//! Market sentiment side channels: the Fear & Greed index and the Ethereum
//! gas oracle.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::ArenaConfig;
use crate::error::{ArenaError, Result};
use crate::market::http::{lenient_f64, UpstreamClient};
use crate::market::types::{FearGreedIndex, GasPrices};

#[derive(Debug, Deserialize)]
struct FngResponse {
    #[serde(default)]
    data: Vec<FngReading>,
}

#[derive(Debug, Deserialize)]
struct FngReading {
    #[serde(deserialize_with = "lenient_f64")]
    value: Option<f64>,
    #[serde(default)]
    value_classification: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    timestamp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    time_until_update: Option<f64>,
}

impl TryFrom<FngResponse> for FearGreedIndex {
    type Error = ArenaError;

    fn try_from(response: FngResponse) -> Result<Self> {
        let reading = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ArenaError::NotFound("fear & greed index has no readings".to_string()))?;
        let value = reading
            .value
            .filter(|v| (0.0..=100.0).contains(v))
            .ok_or_else(|| ArenaError::TransientFetch("fear & greed value out of range".to_string()))?;

        Ok(FearGreedIndex {
            value: value.round() as u8,
            classification: reading.value_classification,
            timestamp: reading.timestamp.map(|t| t as i64).unwrap_or_default(),
            seconds_until_update: reading.time_until_update.map(|t| t.max(0.0) as u64),
        })
    }
}

/// Etherscan wraps every result; `status` is `"1"` on success and `result`
/// holds the error text otherwise.
#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GasOracle {
    #[serde(default, deserialize_with = "lenient_f64")]
    last_block: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    safe_gas_price: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    propose_gas_price: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    fast_gas_price: Option<f64>,
    #[serde(default, rename = "suggestBaseFee", deserialize_with = "lenient_f64")]
    suggest_base_fee: Option<f64>,
}

impl TryFrom<EtherscanResponse> for GasPrices {
    type Error = ArenaError;

    fn try_from(response: EtherscanResponse) -> Result<Self> {
        if response.status != "1" {
            let detail = match &response.result {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            return Err(ArenaError::TransientFetch(format!(
                "gas oracle failed: {} ({})",
                response.message, detail
            )));
        }

        let oracle: GasOracle = serde_json::from_value(response.result)
            .map_err(|e| ArenaError::TransientFetch(format!("malformed gas oracle: {}", e)))?;
        let missing = || ArenaError::TransientFetch("gas oracle omitted a price tier".to_string());

        Ok(GasPrices {
            last_block: oracle.last_block.map(|b| b as u64),
            safe_gwei: oracle.safe_gas_price.ok_or_else(missing)?,
            propose_gwei: oracle.propose_gas_price.ok_or_else(missing)?,
            fast_gwei: oracle.fast_gas_price.ok_or_else(missing)?,
            suggested_base_fee_gwei: oracle.suggest_base_fee,
        })
    }
}

pub struct SentimentClient {
    fear_greed: UpstreamClient,
    etherscan: UpstreamClient,
    etherscan_api_key: Option<String>,
}

impl SentimentClient {
    pub fn new(config: &ArenaConfig) -> Result<Self> {
        let fear_greed = UpstreamClient::new(
            &config.fear_greed_base_url,
            config.http_timeout(),
            config.rate_limit_requests_per_second,
            config.retry_attempts,
        )?;
        let etherscan = UpstreamClient::new(
            &config.etherscan_base_url,
            config.http_timeout(),
            config.rate_limit_requests_per_second,
            config.retry_attempts,
        )?;
        info!(
            "Sentiment clients targeting {} and {}",
            fear_greed.base_url(),
            etherscan.base_url()
        );

        Ok(Self {
            fear_greed,
            etherscan,
            etherscan_api_key: config.etherscan_api_key.clone(),
        })
    }

    #[instrument(skip(self))]
    pub async fn fear_and_greed(&self) -> Result<FearGreedIndex> {
        let response: FngResponse = self.fear_greed.get_json("/fng/", &[]).await?;
        let index = FearGreedIndex::try_from(response)?;
        debug!("Fear & greed at {} ({})", index.value, index.classification);
        Ok(index)
    }

    #[instrument(skip(self))]
    pub async fn gas_prices(&self) -> Result<GasPrices> {
        let mut query = vec![
            ("module", "gastracker".to_string()),
            ("action", "gasoracle".to_string()),
        ];
        if let Some(key) = &self.etherscan_api_key {
            query.push(("apikey", key.clone()));
        }

        let response: EtherscanResponse = self.etherscan.get_json("/api", &query).await?;
        GasPrices::try_from(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fear_greed_from_string_fields() {
        let response: FngResponse = serde_json::from_value(serde_json::json!({
            "name": "Fear and Greed Index",
            "data": [{
                "value": "40",
                "value_classification": "Fear",
                "timestamp": "1551157200",
                "time_until_update": "68499"
            }],
            "metadata": {"error": null}
        }))
        .unwrap();

        let index = FearGreedIndex::try_from(response).unwrap();
        assert_eq!(index.value, 40);
        assert_eq!(index.classification, "Fear");
        assert_eq!(index.timestamp, 1_551_157_200);
        assert_eq!(index.seconds_until_update, Some(68_499));
    }

    #[test]
    fn test_fear_greed_without_readings() {
        let response: FngResponse = serde_json::from_value(serde_json::json!({"data": []})).unwrap();
        assert!(matches!(
            FearGreedIndex::try_from(response),
            Err(ArenaError::NotFound(_))
        ));
    }

    #[test]
    fn test_gas_oracle() {
        let response: EtherscanResponse = serde_json::from_value(serde_json::json!({
            "status": "1",
            "message": "OK",
            "result": {
                "LastBlock": "19000000",
                "SafeGasPrice": "0.81",
                "ProposeGasPrice": "0.95",
                "FastGasPrice": "1.2",
                "suggestBaseFee": "0.80",
                "gasUsedRatio": "0.4,0.5"
            }
        }))
        .unwrap();

        let gas = GasPrices::try_from(response).unwrap();
        assert_eq!(gas.last_block, Some(19_000_000));
        assert_eq!(gas.safe_gwei, 0.81);
        assert_eq!(gas.fast_gwei, 1.2);
        assert_eq!(gas.suggested_base_fee_gwei, Some(0.8));
    }

    #[test]
    fn test_gas_oracle_error_status() {
        let response: EtherscanResponse = serde_json::from_value(serde_json::json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Missing/Invalid API Key"
        }))
        .unwrap();

        match GasPrices::try_from(response) {
            Err(ArenaError::TransientFetch(msg)) => assert!(msg.contains("Invalid API Key")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
