//! Reputation lookups and verdicts.

pub mod abuseipdb;

use crate::rotator::Credential;
use crate::throttle::Throttle;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Score reported by a provider for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreReport {
    /// Abuse confidence score (0-100, higher = worse).
    pub score: u8,
}

/// Classification of one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Positive score; keep the address.
    Malicious,
    /// Well-formed zero score; the address can be dropped.
    Benign,
    /// The lookup failed; treated as `Malicious`.
    Indeterminate,
}

impl Verdict {
    /// Reduce a lookup outcome to a verdict. Only an explicit zero score is benign.
    pub fn from_lookup(outcome: &Result<ScoreReport, ProviderError>) -> Self {
        match outcome {
            Ok(report) if report.score == 0 => Verdict::Benign,
            Ok(_) => Verdict::Malicious,
            Err(_) => Verdict::Indeterminate,
        }
    }

    /// Whether the address should be removed from the list.
    pub fn is_removable(&self) -> bool {
        matches!(self, Verdict::Benign)
    }
}

/// Error from a reputation provider.
#[derive(Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    Http(reqwest::Error),
    /// Timeout.
    Timeout,
    /// Rate limited.
    RateLimited,
    /// Non-success HTTP status.
    Status(u16, String),
    /// Invalid response.
    InvalidResponse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::Timeout => write!(f, "Request timed out"),
            ProviderError::RateLimited => write!(f, "Rate limited"),
            ProviderError::Status(code, body) => write!(f, "HTTP {}: {}", code, body),
            ProviderError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    }
}

/// A source of abuse scores.
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Perform exactly one query for `address` using `credential`.
    async fn lookup(
        &self,
        address: &str,
        credential: &Credential,
    ) -> Result<ScoreReport, ProviderError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Rate-limited, fail-open wrapper around a provider.
pub struct ReputationChecker<P> {
    provider: P,
    throttle: Throttle,
    calls: u64,
}

impl<P: ReputationProvider> ReputationChecker<P> {
    pub fn new(provider: P, throttle: Throttle) -> Self {
        Self {
            provider,
            throttle,
            calls: 0,
        }
    }

    /// Classify one address.
    ///
    /// Waits out the throttle before every query, whatever the previous
    /// outcome was. Lookup errors are logged and come back as
    /// [`Verdict::Indeterminate`].
    pub async fn check(&mut self, address: &str, credential: &Credential) -> Verdict {
        self.throttle.wait().await;
        self.calls += 1;

        let outcome = self.provider.lookup(address, credential).await;
        let verdict = Verdict::from_lookup(&outcome);

        match &outcome {
            Ok(report) => {
                debug!(
                    address = %address,
                    provider = self.provider.name(),
                    score = report.score,
                    verdict = ?verdict,
                    "Lookup complete"
                );
            }
            Err(e) => {
                warn!(
                    address = %address,
                    provider = self.provider.name(),
                    error = %e,
                    "Lookup failed, keeping address"
                );
            }
        }

        verdict
    }

    /// Number of queries issued so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}
