//! Container expansion
//!
//! NVD artifacts are ZIP containers whose members are unpacked into the
//! store. Expansion is all-or-nothing only at the container level: a
//! container that cannot be opened fails the artifact, while a member that
//! cannot be written is skipped and counted.

mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use zip::ZipExpander;

use crate::error::ExpandError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-container expansion counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandSummary {
    /// Members written successfully
    pub extracted: usize,
    /// Members skipped because they could not be written
    pub failed: usize,
}

/// Expand `archive_path` into `dest_path` on the blocking thread pool
pub async fn expand_archive(
    archive_path: &Path,
    dest_path: &Path,
) -> Result<ExpandSummary, ExpandError> {
    let archive = archive_path.to_path_buf();
    let dest = dest_path.to_path_buf();

    tokio::task::spawn_blocking(move || ZipExpander::expand(&archive, &dest))
        .await
        .map_err(|e| ExpandError::Task(e.to_string()))?
}
