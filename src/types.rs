//! Core types for vulnfeed-sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A downloadable artifact discovered by the remote catalog
///
/// Locators are immutable once produced; the catalog may yield duplicates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocator {
    /// Stable identifier (feed year like "2019" or collection tag like "exploitdb")
    pub identifier: String,

    /// Full download URL
    pub remote_url: String,

    /// Year encoded in the remote file name, when there is one
    pub year_tag: Option<u16>,

    /// File name the artifact is stored under in the destination store
    pub file_name: String,
}

/// Restricts a run to a subset of the catalog
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Feed year, matched as a substring of the remote file name
    Year(u16),
    /// Collection tag, matched against the locator identifier
    Collection(String),
}

impl Selector {
    /// Returns true if the locator falls within this selector
    pub fn matches(&self, locator: &ArtifactLocator) -> bool {
        match self {
            Selector::Year(year) => {
                let remote_name = locator
                    .remote_url
                    .rsplit('/')
                    .next()
                    .unwrap_or(&locator.remote_url);
                remote_name.contains(&year.to_string())
            }
            Selector::Collection(tag) => locator.identifier == *tag,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Year(year) => write!(f, "year {}", year),
            Selector::Collection(tag) => write!(f, "collection {}", tag),
        }
    }
}

/// An artifact resident in the destination store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    /// Location on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size_bytes: u64,
    /// Lower-case hex SHA-256 of the file contents
    pub digest: String,
}

/// Why a locator was not downloaded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Excluded by the run's selector
    Filtered,
    /// Local copy already matches the remote digest
    UpToDate,
    /// Same identifier already handled earlier in this run
    Duplicate,
    /// Run was cancelled before or during this download
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Filtered => "filtered",
            SkipReason::UpToDate => "up-to-date",
            SkipReason::Duplicate => "duplicate",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Pipeline stage at which an artifact failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Network request or HTTP status
    Fetch,
    /// Writing the body to the store
    Write,
    /// Body rejected by the feed's validation predicate
    Validate,
    /// Container could not be opened for expansion
    Expand,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Fetch => "fetch",
            FailureStage::Write => "write",
            FailureStage::Validate => "validate",
            FailureStage::Expand => "expand",
        };
        f.write_str(s)
    }
}

/// Result of processing one locator during a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Nothing was written
    Skipped {
        /// Why the locator was skipped
        reason: SkipReason,
    },
    /// A plain artifact was downloaded
    Downloaded {
        /// The stored artifact
        artifact: StoredArtifact,
    },
    /// A container was downloaded and expanded
    ExpandedMembers {
        /// The stored container
        artifact: StoredArtifact,
        /// Members written to the store
        extracted: usize,
        /// Members that could not be written
        failed: usize,
    },
    /// The locator failed; the run continued
    Failed {
        /// Stage that failed
        stage: FailureStage,
        /// Human-readable cause
        cause: String,
    },
}

impl FetchOutcome {
    /// Shorthand for a skipped outcome
    pub fn skipped(reason: SkipReason) -> Self {
        FetchOutcome::Skipped { reason }
    }

    /// Shorthand for a failed outcome
    pub fn failed(stage: FailureStage, cause: impl fmt::Display) -> Self {
        FetchOutcome::Failed {
            stage,
            cause: cause.to_string(),
        }
    }

    /// Artifact written by this outcome, if any
    pub fn artifact(&self) -> Option<&StoredArtifact> {
        match self {
            FetchOutcome::Downloaded { artifact } | FetchOutcome::ExpandedMembers { artifact, .. } => {
                Some(artifact)
            }
            _ => None,
        }
    }

    /// True if the outcome wrote a new artifact to the store
    pub fn is_download(&self) -> bool {
        self.artifact().is_some()
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            FetchOutcome::Downloaded { artifact } => {
                write!(f, "downloaded {} bytes", artifact.size_bytes)
            }
            FetchOutcome::ExpandedMembers {
                artifact,
                extracted,
                failed,
            } => {
                write!(
                    f,
                    "downloaded {} bytes, expanded {} member(s)",
                    artifact.size_bytes, extracted
                )?;
                if *failed > 0 {
                    write!(f, ", {} failed", failed)?;
                }
                Ok(())
            }
            FetchOutcome::Failed { stage, cause } => write!(f, "failed at {}: {}", stage, cause),
        }
    }
}

/// One row of a run report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Locator that was processed
    pub locator: ArtifactLocator,
    /// What happened to it
    pub outcome: FetchOutcome,
}

/// Per-locator outcomes of one run, in catalog order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the last locator finished
    pub finished_at: DateTime<Utc>,
    /// Outcomes in catalog order
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    /// Number of locators that wrote a new artifact
    pub fn downloaded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome.is_download())
            .count()
    }

    /// Number of skipped locators
    pub fn skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, FetchOutcome::Skipped { .. }))
            .count()
    }

    /// Number of failed locators
    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, FetchOutcome::Failed { .. }))
            .count()
    }

    /// Outcome recorded for the first locator with the given identifier
    pub fn outcome_for(&self, identifier: &str) -> Option<&FetchOutcome> {
        self.entries
            .iter()
            .find(|e| e.locator.identifier == identifier)
            .map(|e| &e.outcome)
    }
}
