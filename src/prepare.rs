//! One-pass clean-up of the address list.
//!
//! Runs outside the validation core: it drops comments, blank lines,
//! non-IP lines, non-routable ranges and duplicates, keeping first
//! occurrences in their original order. [`check`] reports the same problems
//! without touching the file.

use crate::error::ValidatorError;
use crate::storage;
use ipnet::IpNet;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Ranges that never belong on a public blocklist.
const RESERVED_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "::/128",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
    "2001:db8::/32",
];

/// What the clean pass should drop besides blanks, comments and duplicates.
#[derive(Debug, Clone, Copy)]
pub struct CleanOptions {
    pub strip_private: bool,
    pub drop_invalid: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            strip_private: true,
            drop_invalid: true,
        }
    }
}

/// Output of a clean pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub addresses: Vec<String>,
    pub duplicates: usize,
    /// Reserved-range addresses that were dropped, in file order.
    pub reserved: Vec<String>,
    pub invalid: usize,
    /// Copy of the list taken before it was rewritten.
    pub backup: Option<PathBuf>,
}

fn reserved_networks() -> Vec<IpNet> {
    RESERVED_RANGES
        .iter()
        .filter_map(|range| range.parse::<IpNet>().ok())
        .collect()
}

/// Whether `ip` falls into a private, loopback or otherwise reserved range.
pub fn is_reserved(ip: &IpAddr) -> bool {
    is_reserved_in(ip, &reserved_networks())
}

fn is_reserved_in(ip: &IpAddr, networks: &[IpNet]) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(*ip),
        IpAddr::V4(_) => *ip,
    };
    networks.iter().any(|net| net.contains(&ip))
}

/// Clean list content.
pub fn clean(content: &str, options: &CleanOptions) -> CleanReport {
    let networks = reserved_networks();
    let mut seen = HashSet::new();
    let mut report = CleanReport::default();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // Canonical form so "::0001" and "::1" dedupe together.
        let key = match trimmed.parse::<IpAddr>() {
            Ok(ip) => {
                if options.strip_private && is_reserved_in(&ip, &networks) {
                    report.reserved.push(ip.to_string());
                    continue;
                }
                ip.to_string()
            }
            Err(_) if options.drop_invalid => {
                report.invalid += 1;
                continue;
            }
            Err(_) => trimmed.to_string(),
        };

        if seen.insert(key.clone()) {
            report.addresses.push(key);
        } else {
            report.duplicates += 1;
        }
    }

    report
}

/// Path of the `.bak` sibling written before a list is cleaned.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Clean the list file in place.
///
/// The original content is copied to `<list>.bak` first. When
/// `reserved_report` is set, the dropped reserved-range addresses are written
/// there, one per line.
pub fn clean_file(
    path: &Path,
    options: &CleanOptions,
    reserved_report: Option<&Path>,
) -> Result<CleanReport, ValidatorError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ValidatorError::storage(path, e))?;

    let backup = backup_path(path);
    storage::write_atomic(&backup, content.as_bytes())?;

    let mut report = clean(&content, options);
    report.backup = Some(backup);

    if let Some(report_path) = reserved_report {
        storage::save_addresses(report_path, &report.reserved)?;
    }
    storage::save_addresses(path, &report.addresses)?;

    info!(
        path = %path.display(),
        kept = report.addresses.len(),
        duplicates = report.duplicates,
        reserved = report.reserved.len(),
        invalid = report.invalid,
        "Address list cleaned"
    );

    Ok(report)
}

/// Problem found on one line of the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintProblem {
    /// More than one whitespace-separated token.
    MultipleTokens,
    /// Not an IPv4 or IPv6 literal.
    NotAnAddress,
    /// Same address as an earlier line.
    Duplicate { first_line: usize },
}

/// A problem with its 1-based line number and the offending text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintIssue {
    pub line: usize,
    pub text: String,
    pub problem: LintProblem,
}

impl std::fmt::Display for LintIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.problem {
            LintProblem::MultipleTokens => {
                write!(f, "line {}: more than one entry: {:?}", self.line, self.text)
            }
            LintProblem::NotAnAddress => {
                write!(f, "line {}: not an IP address: {:?}", self.line, self.text)
            }
            LintProblem::Duplicate { first_line } => write!(
                f,
                "line {}: duplicate of line {}: {:?}",
                self.line, first_line, self.text
            ),
        }
    }
}

/// Report syntax problems without modifying anything.
///
/// Blank lines and `#` comments are ignored.
pub fn check(content: &str) -> Vec<LintIssue> {
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut issues = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let issue = |problem| LintIssue {
            line: line_no,
            text: trimmed.to_string(),
            problem,
        };

        if trimmed.split_whitespace().count() > 1 {
            issues.push(issue(LintProblem::MultipleTokens));
            continue;
        }

        let ip = match trimmed.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                issues.push(issue(LintProblem::NotAnAddress));
                continue;
            }
        };

        match first_seen.get(&ip.to_string()) {
            Some(&first_line) => issues.push(issue(LintProblem::Duplicate { first_line })),
            None => {
                first_seen.insert(ip.to_string(), line_no);
            }
        }
    }

    issues
}

/// [`check`] the list file.
pub fn check_file(path: &Path) -> Result<Vec<LintIssue>, ValidatorError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ValidatorError::storage(path, e))?;
    Ok(check(&content))
}
