//! IP list validator for Zentinel.
//!
//! Keeps a list of malicious IP addresses honest by re-checking entries
//! against AbuseIPDB and pruning the ones whose abuse confidence score has
//! dropped to zero.
//!
//! # Features
//!
//! - **Resumable scans** - A persisted cursor lets a daily quota cover a long list over several runs
//! - **Key rotation** - Spreads lookups over several API keys, a fixed quota each
//! - **Fail-open** - Only an explicit zero score removes an address; errors keep it
//! - **Crash safety** - The list and cursor are replaced atomically at the end of a run
//! - **Audit trail** - A backup per run and an append-only log of removals
//!
//! # Example Configuration
//!
//! ```yaml
//! paths:
//!   list: "malicious_ips.txt"
//!   cursor: "cursor.txt"
//!
//! abuseipdb:
//!   api_keys: "${ABUSEIPDB_API_KEYS}"
//!   max_per_key: 1000
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod prepare;
pub mod providers;
pub mod rotator;
pub mod run;
pub mod storage;
pub mod throttle;

pub use config::Config;
pub use error::ValidatorError;
pub use run::{RunSummary, ValidationRun};
