//! Configuration types for the IP list validator.

use crate::error::ValidatorError;
use crate::prepare::CleanOptions;
use crate::rotator::Credential;
use crate::run::RunPaths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Where the list, cursor, backups and verdict log live.
    #[serde(default)]
    pub paths: PathsConfig,

    /// AbuseIPDB access and quota.
    #[serde(default)]
    pub abuseipdb: AbuseIPDBConfig,

    /// Options for the `--clean` pre-processing pass.
    #[serde(default)]
    pub prepare: PrepareConfig,
}

/// File locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Address list, one IP per line.
    #[serde(default = "default_list_path")]
    pub list: PathBuf,

    /// Persisted scan cursor.
    #[serde(default = "default_cursor_path")]
    pub cursor: PathBuf,

    /// Directory receiving one snapshot per run.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Append-only log of removed addresses.
    #[serde(default = "default_verdict_log")]
    pub verdict_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            list: default_list_path(),
            cursor: default_cursor_path(),
            backup_dir: default_backup_dir(),
            verdict_log: default_verdict_log(),
        }
    }
}

fn default_list_path() -> PathBuf {
    PathBuf::from("malicious_ips.txt")
}

fn default_cursor_path() -> PathBuf {
    PathBuf::from("cursor.txt")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_verdict_log() -> PathBuf {
    PathBuf::from("removed_ips.log")
}

/// API keys, either as one comma-separated string or as a YAML list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ApiKeys {
    Joined(String),
    List(Vec<String>),
}

impl Default for ApiKeys {
    fn default() -> Self {
        ApiKeys::Joined(String::new())
    }
}

impl ApiKeys {
    /// Split into individual keys, dropping blanks.
    pub fn keys(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            ApiKeys::Joined(joined) => joined.split(',').collect(),
            ApiKeys::List(list) => list.iter().map(String::as_str).collect(),
        };

        raw.into_iter()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// AbuseIPDB provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbuseIPDBConfig {
    /// API keys (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub api_keys: ApiKeys,

    /// Lookups allowed per key in one run.
    #[serde(default = "default_max_per_key")]
    pub max_per_key: u32,

    /// Only consider reports from the last N days.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// API request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Minimum delay between two queries in milliseconds.
    #[serde(default = "default_request_interval")]
    pub request_interval_ms: u64,

    /// Check endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for AbuseIPDBConfig {
    fn default() -> Self {
        Self {
            api_keys: ApiKeys::default(),
            max_per_key: default_max_per_key(),
            max_age_days: default_max_age_days(),
            timeout_ms: default_timeout(),
            request_interval_ms: default_request_interval(),
            base_url: default_base_url(),
        }
    }
}

impl AbuseIPDBConfig {
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}

fn default_max_per_key() -> u32 {
    1000
}

fn default_max_age_days() -> u32 {
    90
}

fn default_timeout() -> u64 {
    10_000
}

fn default_request_interval() -> u64 {
    1200
}

fn default_base_url() -> String {
    "https://api.abuseipdb.com/api/v2/check".to_string()
}

/// Pre-processing options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrepareConfig {
    /// Drop private, loopback and other non-routable addresses.
    #[serde(default = "default_true")]
    pub strip_private: bool,

    /// Drop lines that are not IP literals.
    #[serde(default = "default_true")]
    pub drop_invalid: bool,

    /// Where to list the reserved-range addresses a clean pass dropped.
    #[serde(default)]
    pub reserved_report: Option<PathBuf>,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            strip_private: true,
            drop_invalid: true,
            reserved_report: None,
        }
    }
}

impl From<&PrepareConfig> for CleanOptions {
    fn from(config: &PrepareConfig) -> Self {
        CleanOptions {
            strip_private: config.strip_private,
            drop_invalid: config.drop_invalid,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    ///
    /// Credentials are not required here so that `--clean` and `--check-list`
    /// work without secrets; see [`Config::credentials`].
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.abuseipdb.max_per_key == 0 {
            anyhow::bail!("abuseipdb.max_per_key must be greater than 0");
        }

        if self.abuseipdb.timeout_ms == 0 {
            anyhow::bail!("abuseipdb.timeout_ms must be greater than 0");
        }

        if !self.abuseipdb.base_url.starts_with("http://")
            && !self.abuseipdb.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "abuseipdb.base_url must be an http(s) URL: {}",
                self.abuseipdb.base_url
            );
        }

        Ok(())
    }

    /// Configured API credentials, in rotation order.
    pub fn credentials(&self) -> Result<Vec<Credential>, ValidatorError> {
        let keys = self.abuseipdb.api_keys.keys();
        if keys.is_empty() {
            return Err(ValidatorError::Config(
                "no API credentials configured (abuseipdb.api_keys)".to_string(),
            ));
        }
        Ok(keys.into_iter().map(Credential::new).collect())
    }

    /// File locations for a validation run.
    pub fn run_paths(&self) -> RunPaths {
        RunPaths {
            list: self.paths.list.clone(),
            cursor: self.paths.cursor.clone(),
            backup_dir: self.paths.backup_dir.clone(),
            verdict_log: self.paths.verdict_log.clone(),
        }
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# IP List Validator Configuration

paths:
  list: "malicious_ips.txt"        # one IP per line
  cursor: "cursor.txt"             # next index to examine
  backup_dir: "backups"            # one snapshot per run
  verdict_log: "removed_ips.log"   # "<timestamp> | <address>" per removal

abuseipdb:
  api_keys: "${ABUSEIPDB_API_KEYS}"  # comma-separated, or a YAML list
  max_per_key: 1000                # daily quota per key
  max_age_days: 90                 # only consider reports from last 90 days
  timeout_ms: 10000                # API timeout
  request_interval_ms: 1200        # minimum delay between queries
  base_url: "https://api.abuseipdb.com/api/v2/check"

# Used by --clean
prepare:
  strip_private: true              # drop private/loopback/reserved ranges
  drop_invalid: true               # drop lines that are not IP literals
  reserved_report: "private_ips_found.txt"  # dropped reserved addresses
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern");

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
