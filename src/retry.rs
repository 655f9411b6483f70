//! Backoff between attempts of a feed request
//!
//! Listing pages and artifacts are requested through [`with_backoff`]. A
//! transient failure (timeout, dropped connection, 5xx, 429) is tried again
//! after a delay taken from [`Backoff`]; anything else is returned at once.
//! The wait between attempts ends early when the run is cancelled.

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Whether another attempt at the same request could succeed
pub fn is_transient(error: &FetchError) -> bool {
    match error {
        FetchError::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
        FetchError::Status { status } => *status >= 500 || *status == 429,
        FetchError::Write { source, .. } => source.kind() == std::io::ErrorKind::Interrupted,
        FetchError::InvalidBody { .. } | FetchError::Cancelled => false,
    }
}

/// Delay schedule for the retries of one request
///
/// Delays grow by `backoff_multiplier` and never exceed `max_delay`, whatever
/// the multiplier is. After `max_attempts` delays the schedule is exhausted.
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
    remaining: u32,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            remaining: config.max_attempts,
        }
    }

    /// Delay before the next attempt, or `None` once the retry budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.next.min(self.max);
        self.next = scale(base, self.multiplier).map_or(self.max, |d| d.min(self.max));

        if self.jitter {
            Some(add_jitter(base))
        } else {
            Some(base)
        }
    }
}

/// `delay * factor`, or `None` when the product is not a valid duration
fn scale(delay: Duration, factor: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).ok()
}

/// Stretch `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(0.0..=1.0);
    scale(delay, factor).unwrap_or(delay)
}

/// Run `attempt` until it succeeds, fails permanently, or the retry budget
/// in `config` is spent.
///
/// `config.max_attempts` counts retries after the first try. Cancelling
/// `cancel` during a backoff wait returns [`FetchError::Cancelled`] without
/// another attempt.
pub async fn with_backoff<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut backoff = Backoff::new(config);
    let mut tries: u32 = 1;

    loop {
        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !is_transient(&error) {
            return Err(error);
        }
        let Some(delay) = backoff.next_delay() else {
            warn!(error = %error, tries, "giving up after transient failures");
            return Err(error);
        };

        debug!(
            error = %error,
            tries,
            delay_ms = delay.as_millis() as u64,
            "transient failure, backing off"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        tries += 1;
    }
}
