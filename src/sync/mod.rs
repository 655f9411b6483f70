//! Run orchestration
//!
//! [`SyncOrchestrator`] lists the catalog once, decides per locator whether it
//! is filtered, duplicated, up to date or stale, and drives the fetcher and
//! expander for the stale ones. Per-locator failures are recorded in the
//! [`RunReport`]; only precondition failures end a run early.

use crate::catalog::RemoteCatalog;
use crate::config::{Config, StalenessProbe};
use crate::error::{Error, FetchError, Result};
use crate::extraction::expand_archive;
use crate::fetcher::{ArtifactFetcher, FetchResult, build_client};
use crate::types::{
    ArtifactLocator, FailureStage, FetchOutcome, ReportEntry, RunReport, Selector, SkipReason,
};
use crate::verify::{file_digest, is_stale_digest};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Drives one feed synchronization
///
/// All settings, including credentials, are fixed at construction.
pub struct SyncOrchestrator {
    config: Config,
    catalog: RemoteCatalog,
    fetcher: ArtifactFetcher,
}

impl SyncOrchestrator {
    /// Create an orchestrator for `config`.
    ///
    /// Fails if the configuration is invalid or the feed family needs an API
    /// key and none was given.
    pub fn new(config: Config, api_key: Option<String>) -> Result<Self> {
        config.validate()?;

        let family = config.feed.family;
        let api_key = api_key.filter(|key| !key.trim().is_empty());
        if family.requires_api_key() && api_key.is_none() {
            return Err(Error::MissingCredentials(family));
        }

        let client = build_client(&config.http)?;
        let catalog = RemoteCatalog::new(client.clone(), config.feed.clone(), config.retry.clone());
        let fetcher = ArtifactFetcher::new(client, family, api_key, config.retry.clone());

        Ok(Self {
            config,
            catalog,
            fetcher,
        })
    }

    /// Configuration this orchestrator was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Synchronize the store with the remote catalog.
    ///
    /// Every catalog entry gets exactly one report entry, in catalog order.
    /// Entries outside `selector` are reported as filtered. Once `cancel`
    /// fires, no new downloads start and an in-flight one is rolled back.
    pub async fn run(
        &self,
        selector: Option<&Selector>,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let store_dir = self.config.store_dir();

        tokio::fs::create_dir_all(&store_dir)
            .await
            .map_err(|source| Error::StoreDir {
                path: store_dir.clone(),
                source,
            })?;

        let catalog = self.catalog.list(None).await?;
        info!(
            family = %self.config.feed.family,
            store = %store_dir.display(),
            locators = catalog.len(),
            selector = ?selector,
            "starting sync"
        );

        let planned = plan(catalog, selector);
        let concurrency = self.config.max_concurrent_fetches.max(1);
        let this = self;
        let cancel = &cancel;

        let entries: Vec<ReportEntry> = stream::iter(planned)
            .map(move |(locator, decided)| async move {
                let outcome = match decided {
                    Some(outcome) => outcome,
                    None => this.process(&locator, cancel).await,
                };
                log_outcome(&locator, &outcome);
                ReportEntry { locator, outcome }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            entries,
        };

        info!(
            downloaded = report.downloaded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "sync finished"
        );
        Ok(report)
    }

    async fn process(&self, locator: &ArtifactLocator, cancel: &CancellationToken) -> FetchOutcome {
        if cancel.is_cancelled() {
            return FetchOutcome::skipped(SkipReason::Cancelled);
        }

        let dest = self.config.store_dir().join(&locator.file_name);
        let local_digest = local_digest(&dest).await;

        if let Some(local) = local_digest.as_deref()
            && self.config.http.staleness_probe == StalenessProbe::Head
        {
            let remote = self.fetcher.probe_digest(locator).await;
            if !is_stale_digest(Some(local), remote.as_deref()) {
                return FetchOutcome::skipped(SkipReason::UpToDate);
            }
        }

        let artifact = match self
            .fetcher
            .fetch(locator, &dest, local_digest.as_deref(), cancel)
            .await
        {
            Ok(FetchResult::UpToDate) => return FetchOutcome::skipped(SkipReason::UpToDate),
            Ok(FetchResult::Stored(artifact)) => artifact,
            Err(FetchError::Cancelled) => return FetchOutcome::skipped(SkipReason::Cancelled),
            Err(e) => return FetchOutcome::failed(e.stage(), e),
        };

        if !self.config.feed.family.is_container() {
            return FetchOutcome::Downloaded { artifact };
        }

        match expand_archive(&artifact.path, &self.config.extract_dir()).await {
            Ok(summary) => FetchOutcome::ExpandedMembers {
                artifact,
                extracted: summary.extracted,
                failed: summary.failed,
            },
            Err(e) => FetchOutcome::failed(FailureStage::Expand, e),
        }
    }
}

/// Decide filtered and duplicate entries up front so concurrent processing
/// never touches the same file twice.
///
/// A repeated file name is reported as `Skipped(Duplicate)` instead of being
/// checked again. Different files that share an identifier, such as two feed
/// versions of one year, are both processed.
fn plan(
    catalog: Vec<ArtifactLocator>,
    selector: Option<&Selector>,
) -> Vec<(ArtifactLocator, Option<FetchOutcome>)> {
    let mut seen = HashSet::new();
    catalog
        .into_iter()
        .map(|locator| {
            let decided = if selector.is_some_and(|s| !s.matches(&locator)) {
                Some(FetchOutcome::skipped(SkipReason::Filtered))
            } else if !seen.insert(locator.file_name.clone()) {
                Some(FetchOutcome::skipped(SkipReason::Duplicate))
            } else {
                None
            };
            (locator, decided)
        })
        .collect()
}

/// Digest of the stored copy, if there is a readable one
async fn local_digest(path: &Path) -> Option<String> {
    if !tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) {
        return None;
    }

    let owned = path.to_path_buf();
    match tokio::task::spawn_blocking(move || file_digest(&owned)).await {
        Ok(Ok(digest)) => Some(digest),
        Ok(Err(e)) => {
            debug!(path = %path.display(), error = %e, "cannot digest stored copy, treating as stale");
            None
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "digest task failed");
            None
        }
    }
}

fn log_outcome(locator: &ArtifactLocator, outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Failed { stage, cause } => warn!(
            identifier = %locator.identifier,
            url = %locator.remote_url,
            %stage,
            cause = %cause,
            "locator failed"
        ),
        FetchOutcome::Skipped { reason } => {
            debug!(identifier = %locator.identifier, %reason, "locator skipped")
        }
        other => info!(identifier = %locator.identifier, outcome = %other, "locator synced"),
    }
}
