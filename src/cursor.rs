//! Persisted scan position.
//!
//! The cursor is the index of the next address to examine. It is read once
//! when a run starts and written once when it commits.

use crate::error::ValidatorError;
use crate::storage::write_atomic;
use std::path::Path;

/// Load the cursor, defaulting to 0 when no cursor file exists yet.
///
/// A file that exists but does not hold a non-negative integer is reported
/// as corrupt state rather than reset.
pub fn load(path: &Path) -> Result<usize, ValidatorError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(ValidatorError::storage(path, e)),
    };

    let trimmed = content.trim();
    trimmed.parse::<usize>().map_err(|_| {
        ValidatorError::state(path, format!("not a non-negative integer: {:?}", trimmed))
    })
}

/// Overwrite the persisted cursor.
pub fn save(path: &Path, position: usize) -> Result<(), ValidatorError> {
    write_atomic(path, position.to_string().as_bytes())
}

/// Wrap `position` back to the start once it runs off the end of the list.
pub fn advance(position: usize, len: usize) -> usize {
    if position >= len {
        0
    } else {
        position
    }
}
