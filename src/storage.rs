//! On-disk storage for the address list, backups and the verdict log.
//!
//! The list and cursor files are only ever replaced whole, through a
//! temporary file in the same directory that is renamed over the target.
//! A process killed mid-run therefore leaves the previous contents intact.

use crate::error::ValidatorError;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timestamp format used in backup file names.
const BACKUP_STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Timestamp format used in verdict log lines.
const VERDICT_STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An address dropped during a run, with the time its benign verdict came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedEntry {
    pub removed_at: DateTime<Utc>,
    pub address: String,
}

impl RemovedEntry {
    /// Render as a verdict log line (without the trailing newline).
    pub fn to_log_line(&self) -> String {
        format!(
            "{} | {}",
            self.removed_at.format(VERDICT_STAMP_FORMAT),
            self.address
        )
    }
}

/// Load the address list, one entry per line, in file order.
///
/// Blank lines are skipped and surrounding whitespace is trimmed. Duplicates
/// are kept as-is.
pub fn load_addresses(path: &Path) -> Result<Vec<String>, ValidatorError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ValidatorError::storage(path, e))?;

    Ok(parse_addresses(&content))
}

fn parse_addresses(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn render_addresses(addresses: &[String]) -> String {
    let mut out = String::with_capacity(addresses.iter().map(|a| a.len() + 1).sum());
    for address in addresses {
        out.push_str(address);
        out.push('\n');
    }
    out
}

/// Replace the address list with `addresses`.
pub fn save_addresses(path: &Path, addresses: &[String]) -> Result<(), ValidatorError> {
    write_atomic(path, render_addresses(addresses).as_bytes())
}

/// Write an immutable snapshot of `addresses` into `dir`.
///
/// The file is named after `taken_at` and created exclusively; if a snapshot
/// with that name already exists a numeric suffix is added instead of
/// overwriting it.
pub fn write_backup(
    dir: &Path,
    addresses: &[String],
    taken_at: DateTime<Utc>,
) -> Result<PathBuf, ValidatorError> {
    std::fs::create_dir_all(dir).map_err(|e| ValidatorError::storage(dir, e))?;

    let stamp = taken_at.format(BACKUP_STAMP_FORMAT).to_string();
    let content = render_addresses(addresses);

    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("backup-{}.txt", stamp)
        } else {
            format!("backup-{}-{}.txt", stamp, attempt)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(content.as_bytes())
                    .and_then(|_| file.sync_all())
                    .map_err(|e| ValidatorError::storage(&path, e))?;
                debug!(path = %path.display(), entries = addresses.len(), "Backup written");
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(ValidatorError::storage(&path, e)),
        }
    }
}

/// Append removed addresses to the verdict log.
///
/// Does not touch the file when `entries` is empty.
pub fn append_verdicts(path: &Path, entries: &[RemovedEntry]) -> Result<(), ValidatorError> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut lines = String::new();
    for entry in entries {
        lines.push_str(&entry.to_log_line());
        lines.push('\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ValidatorError::storage(path, e))?;

    file.write_all(lines.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| ValidatorError::storage(path, e))
}

/// Write `bytes` to `path` via a temp file in the same directory, then rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ValidatorError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| ValidatorError::storage(path, e))?;

    temp.as_file_mut()
        .write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| ValidatorError::storage(path, e))?;

    temp.persist(path)
        .map_err(|e| ValidatorError::storage(path, e.error))?;

    Ok(())
}
