//! Store summary and hash manifest
//!
//! The summary is recomputed from disk after every run, independent of the
//! run's outcomes. Entries are sorted by their path relative to the store so
//! two summaries of the same store are identical.

use crate::error::{Error, Result};
use crate::fetcher::PARTIAL_SUFFIX;
use crate::verify::file_digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

const RULE_WIDTH: usize = 120;

/// One file in the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    /// Path relative to the store directory
    pub name: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the current contents
    pub digest: String,
}

/// Current contents of a store directory
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    /// Files in lexical order of their relative path
    pub entries: Vec<SummaryEntry>,
}

impl StoreSummary {
    /// Total size of all listed files
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }
}

/// Scan `store_dir` recursively and digest every regular file.
///
/// Files that disappear or cannot be read during the scan are logged and
/// left out, as are `.part` downloads left behind by an interrupted run. A
/// store directory that cannot be read at all is an error.
pub fn summarize(store_dir: &Path) -> Result<StoreSummary> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(store_dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(Error::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other(format!("cannot read {}", store_dir.display()))
                })));
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable store entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX) {
            debug!(path = %path.display(), "skipping unfinished download");
            continue;
        }
        let size_bytes = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat store file");
                continue;
            }
        };
        let digest = match file_digest(path) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot digest store file");
                continue;
            }
        };

        let name = path
            .strip_prefix(store_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        entries.push(SummaryEntry {
            name,
            size_bytes,
            digest,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(store = %store_dir.display(), files = entries.len(), "store summarized");

    Ok(StoreSummary { entries })
}

/// Write `name<TAB>size<TAB>digest` lines for every entry
pub fn write_manifest(path: &Path, summary: &StoreSummary) -> Result<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    for entry in &summary.entries {
        writeln!(out, "{}\t{}\t{}", entry.name, entry.size_bytes, entry.digest)?;
    }
    out.flush()?;
    Ok(())
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(RULE_WIDTH);
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:>70}", "Summary:")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:<30} {:>20} {:>50}", "Filename", "Size", "sha256")?;
        writeln!(f, "{}", rule)?;
        for entry in &self.entries {
            writeln!(
                f,
                "{:<30} {:>20} {:>50}",
                entry.name, entry.size_bytes, entry.digest
            )?;
        }
        write!(f, "{}", rule)
    }
}
