//! # vulnfeed-sync
//!
//! Incremental synchronization of published vulnerability feeds into a local
//! store.
//!
//! A run lists the remote catalog, skips artifacts whose stored copy still
//! matches the digest the remote advertises, downloads the rest atomically,
//! expands container artifacts, and reports one outcome per catalog entry.
//! A failing artifact never stops the run; only an unreachable catalog, an
//! unusable store directory or missing credentials do.
//!
//! ## Quick Start
//!
//! ```no_run
//! use vulnfeed_sync::{Config, FeedFamily, Selector, SyncOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::for_family(FeedFamily::Nvd);
//!     let orchestrator = SyncOrchestrator::new(config, None)?;
//!
//!     let report = orchestrator
//!         .run(Some(&Selector::Year(2019)), CancellationToken::new())
//!         .await?;
//!     for entry in &report.entries {
//!         println!("{}: {}", entry.locator.identifier, entry.outcome);
//!     }
//!
//!     let summary = vulnfeed_sync::summary::summarize(&orchestrator.config().store_dir())?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote artifact catalog
pub mod catalog;
/// Configuration types
pub mod config;
/// API key providers
pub mod credentials;
/// Error types
pub mod error;
/// Container expansion
pub mod extraction;
/// Feed family policies
pub mod feed;
/// Artifact download
pub mod fetcher;
/// Tracing subscriber setup
pub mod logging;
/// Retry logic with exponential backoff
pub mod retry;
/// Store summary and manifest
pub mod summary;
/// Run orchestration
pub mod sync;
/// Core types
pub mod types;
/// Content digests and staleness
pub mod verify;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, ExpandError, FetchError, Result};
pub use feed::FeedFamily;
pub use sync::SyncOrchestrator;
pub use types::{
    ArtifactLocator, FailureStage, FetchOutcome, ReportEntry, RunReport, Selector, SkipReason,
    StoredArtifact,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` on SIGINT or SIGTERM (Ctrl+C outside unix).
///
/// The returned task can be aborted once the run has finished.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                tracing::info!("Cancelling sync, in-flight downloads will be rolled back");
                token.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for termination signals"),
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
