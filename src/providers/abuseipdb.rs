//! AbuseIPDB reputation provider.

use super::{ProviderError, ReputationProvider, ScoreReport};
use crate::config::AbuseIPDBConfig;
use crate::rotator::Credential;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// AbuseIPDB API response.
#[derive(Debug, Deserialize)]
struct AbuseIPDBResponse {
    data: AbuseIPDBData,
}

/// AbuseIPDB API response data. Only the score is required.
#[derive(Debug, Deserialize)]
struct AbuseIPDBData {
    /// Abuse confidence score (0-100).
    #[serde(rename = "abuseConfidenceScore")]
    abuse_confidence_score: u8,

    /// Total number of reports.
    #[serde(rename = "totalReports", default)]
    total_reports: u32,
}

/// AbuseIPDB reputation provider.
pub struct AbuseIPDBProvider {
    base_url: String,
    max_age_days: u32,
    client: Client,
}

impl AbuseIPDBProvider {
    /// Create a new AbuseIPDB provider.
    pub fn new(config: &AbuseIPDBConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            base_url: config.base_url.clone(),
            max_age_days: config.max_age_days,
            client,
        })
    }
}

/// Extract the score from a response body.
fn parse_score(body: &str) -> Result<ScoreReport, ProviderError> {
    let response: AbuseIPDBResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
    })?;

    let score = response.data.abuse_confidence_score;
    if score > 100 {
        return Err(ProviderError::InvalidResponse(format!(
            "abuseConfidenceScore out of range: {}",
            score
        )));
    }

    debug!(
        score = score,
        reports = response.data.total_reports,
        "AbuseIPDB response parsed"
    );

    Ok(ScoreReport { score })
}

#[async_trait]
impl ReputationProvider for AbuseIPDBProvider {
    async fn lookup(
        &self,
        address: &str,
        credential: &Credential,
    ) -> Result<ScoreReport, ProviderError> {
        debug!(address = %address, "Querying AbuseIPDB");

        let max_age = self.max_age_days.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("ipAddress", address), ("maxAgeInDays", max_age.as_str())])
            .header("Key", credential.expose())
            .header("Accept", "application/json")
            .send()
            .await?;

        // Check for rate limiting
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("AbuseIPDB rate limit exceeded");
            return Err(ProviderError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status(status.as_u16(), body));
        }

        let body = response.text().await?;
        parse_score(&body)
    }

    fn name(&self) -> &str {
        "abuseipdb"
    }
}
