//! Remote catalog of downloadable feed artifacts
//!
//! NVD artifacts are discovered by scanning the data-feeds page for file
//! names matching the configured pattern. Vulners collections need no
//! discovery: each configured tag maps to one archive URL.

use crate::config::{FeedConfig, RetryConfig};
use crate::error::{Error, FetchError, Result};
use crate::feed::FeedFamily;
use crate::retry::with_backoff;
use crate::types::{ArtifactLocator, Selector};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Produces the ordered list of artifacts a feed currently publishes
pub struct RemoteCatalog {
    client: reqwest::Client,
    feed: FeedConfig,
    retry: RetryConfig,
}

impl RemoteCatalog {
    /// Create a catalog for the configured feed, sharing an HTTP client
    pub fn new(client: reqwest::Client, feed: FeedConfig, retry: RetryConfig) -> Self {
        Self {
            client,
            feed,
            retry,
        }
    }

    /// Feed family this catalog lists
    pub fn family(&self) -> FeedFamily {
        self.feed.family
    }

    /// List artifacts in catalog order, keeping only those matching `selector`.
    ///
    /// Fails as a whole if the listing cannot be fetched; there is no partial
    /// catalog.
    pub async fn list(&self, selector: Option<&Selector>) -> Result<Vec<ArtifactLocator>> {
        let locators = match self.feed.family {
            FeedFamily::Nvd => {
                let body = self.fetch_listing().await?;
                self.parse_listing(&body)?
            }
            FeedFamily::VulnersArchive => self.collection_locators(),
        };

        let total = locators.len();
        let locators: Vec<_> = match selector {
            Some(sel) => locators.into_iter().filter(|l| sel.matches(l)).collect(),
            None => locators,
        };

        info!(
            family = %self.feed.family,
            total,
            selected = locators.len(),
            "feed catalog listed"
        );
        Ok(locators)
    }

    async fn fetch_listing(&self) -> Result<String> {
        let url = &self.feed.listing_url;
        debug!(url = %url, "fetching feed listing");

        let client = &self.client;
        // The listing is not interrupted; a cancelled run still reports every entry
        let uncancelled = CancellationToken::new();
        let result = with_backoff(&self.retry, &uncancelled, move || async move {
            let response = client.get(url.as_str()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                });
            }
            Ok(response.text().await?)
        })
        .await;

        result.map_err(|e| Error::Catalog {
            url: url.clone(),
            reason: e.to_string(),
        })
    }

    /// Extract NVD artifact locators from a listing page body
    pub fn parse_listing(&self, body: &str) -> Result<Vec<ArtifactLocator>> {
        let pattern = Regex::new(&self.feed.artifact_pattern).map_err(|e| {
            Error::config(format!("invalid pattern: {}", e), "feed.artifact_pattern")
        })?;

        let mut base = self.feed.download_base.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| Error::config(format!("invalid URL: {}", e), "feed.download_base"))?;

        let mut locators = Vec::new();
        for m in pattern.find_iter(body) {
            let file_name = m.as_str();
            let remote_url = match base.join(file_name) {
                Ok(url) => url.to_string(),
                Err(e) => {
                    warn!(file_name, error = %e, "skipping listing entry with unusable name");
                    continue;
                }
            };
            let identifier = feed_identifier(file_name);
            locators.push(ArtifactLocator {
                year_tag: identifier.parse().ok(),
                identifier,
                remote_url,
                file_name: file_name.to_string(),
            });
        }

        if locators.is_empty() {
            warn!(
                url = %self.feed.listing_url,
                pattern = %self.feed.artifact_pattern,
                "listing page contained no artifact names"
            );
        }
        Ok(locators)
    }

    fn collection_locators(&self) -> Vec<ArtifactLocator> {
        self.feed
            .collections
            .iter()
            .map(|tag| ArtifactLocator {
                identifier: tag.clone(),
                remote_url: format!("{}{}", self.feed.archive_base, tag),
                year_tag: None,
                file_name: format!("{}.json", tag),
            })
            .collect()
    }
}

/// Identifier embedded in a feed file name: the part after the last `-` up to
/// the first `.` (`nvdcve-1.1-2019.json.zip` -> `2019`).
fn feed_identifier(file_name: &str) -> String {
    let tail = file_name.rsplit('-').next().unwrap_or(file_name);
    let id = tail.split('.').next().unwrap_or(tail);
    if id.is_empty() {
        file_name.to_string()
    } else {
        id.to_string()
    }
}
