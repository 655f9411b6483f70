//! Feed families and their per-source policies
//!
//! Each supported source publishes its artifacts differently. Rather than
//! special-casing sources throughout the pipeline, every policy decision that
//! differs between them lives on [`FeedFamily`]: which response header carries
//! the content digest, whether artifacts are containers, how a body is
//! validated, and whether requests must be authenticated.

use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Body length of the Vulners "collection not found" placeholder document
pub const VULNERS_PLACEHOLDER_LEN: u64 = 131;

/// Request header carrying the Vulners API key
pub const VULNERS_API_KEY_HEADER: &str = "X-Api-Key";

/// Supported feed sources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFamily {
    /// NVD JSON 1.1 yearly feeds, discovered from the data-feeds page
    #[default]
    Nvd,
    /// Vulners collection archives, one per hard-coded collection tag
    #[serde(alias = "vulners")]
    VulnersArchive,
}

impl FeedFamily {
    /// Response header the remote uses to advertise the artifact's SHA-256
    pub fn digest_header(&self) -> &'static str {
        match self {
            FeedFamily::Nvd => "X-Content-SHA256",
            FeedFamily::VulnersArchive => "X-SHA256",
        }
    }

    /// Whether downloaded artifacts are ZIP containers to be expanded
    pub fn is_container(&self) -> bool {
        matches!(self, FeedFamily::Nvd)
    }

    /// Whether requests must carry an API key
    pub fn requires_api_key(&self) -> bool {
        matches!(self, FeedFamily::VulnersArchive)
    }

    /// Header name used to send the API key, for families that need one
    pub fn api_key_header(&self) -> Option<&'static str> {
        match self {
            FeedFamily::Nvd => None,
            FeedFamily::VulnersArchive => Some(VULNERS_API_KEY_HEADER),
        }
    }

    /// Store directory used when none is configured
    pub fn default_store_dir(&self) -> PathBuf {
        match self {
            FeedFamily::Nvd => PathBuf::from("nvd"),
            FeedFamily::VulnersArchive => PathBuf::from("vulners"),
        }
    }

    /// Validation predicate applied to a fully received body.
    ///
    /// A success status does not guarantee a usable artifact: Vulners answers
    /// unknown collections with HTTP 200 and a fixed-size placeholder.
    pub fn validate_body(&self, len: u64) -> Result<(), FetchError> {
        match self {
            FeedFamily::Nvd => Ok(()),
            FeedFamily::VulnersArchive if len == VULNERS_PLACEHOLDER_LEN => {
                Err(FetchError::InvalidBody { len })
            }
            FeedFamily::VulnersArchive => Ok(()),
        }
    }
}

impl fmt::Display for FeedFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedFamily::Nvd => write!(f, "nvd"),
            FeedFamily::VulnersArchive => write!(f, "vulners"),
        }
    }
}

impl std::str::FromStr for FeedFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nvd" => Ok(FeedFamily::Nvd),
            "vulners" | "vulners_archive" => Ok(FeedFamily::VulnersArchive),
            other => Err(format!("unknown feed family '{other}' (expected nvd or vulners)")),
        }
    }
}
