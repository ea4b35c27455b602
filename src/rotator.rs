//! Round-robin allocation of query slots across API credentials.

use crate::error::ValidatorError;

/// An API key. `Debug` output never shows the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for the request header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential(***)")
    }
}

/// One query slot handed out by the rotator.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub credential: Credential,
    /// Position of the credential in the configured order.
    pub key_index: usize,
    /// Slots left on this credential after this one.
    pub remaining: u32,
}

/// Hands out up to `max_per_key` slots per credential, in order.
///
/// Quota does not carry over between runs; a fresh rotator starts every
/// credential at its full budget.
#[derive(Debug)]
pub struct CredentialRotator {
    credentials: Vec<Credential>,
    max_per_key: u32,
    key_index: usize,
    used_on_key: u32,
    consumed: u64,
}

impl CredentialRotator {
    /// Create a rotator. Fails when no credentials are given.
    pub fn new(credentials: Vec<Credential>, max_per_key: u32) -> Result<Self, ValidatorError> {
        if credentials.is_empty() {
            return Err(ValidatorError::Config(
                "no API credentials configured".to_string(),
            ));
        }

        Ok(Self {
            credentials,
            max_per_key,
            key_index: 0,
            used_on_key: 0,
            consumed: 0,
        })
    }

    /// Total slots available this run.
    pub fn total_quota(&self) -> u64 {
        self.credentials.len() as u64 * u64::from(self.max_per_key)
    }

    /// Slots handed out so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn key_count(&self) -> usize {
        self.credentials.len()
    }
}

impl Iterator for CredentialRotator {
    type Item = Allocation;

    fn next(&mut self) -> Option<Allocation> {
        // Global quota first, then the current key's quota.
        if self.consumed >= self.total_quota() {
            return None;
        }

        while self.used_on_key >= self.max_per_key {
            self.key_index += 1;
            self.used_on_key = 0;
            if self.key_index >= self.credentials.len() {
                return None;
            }
        }

        self.used_on_key += 1;
        self.consumed += 1;

        Some(Allocation {
            credential: self.credentials[self.key_index].clone(),
            key_index: self.key_index,
            remaining: self.max_per_key - self.used_on_key,
        })
    }
}
