//! Artifact download with atomic placement
//!
//! A download streams into `<file>.part` next to its destination while the
//! SHA-256 is computed on the fly. Only a body that completed without error
//! and passed the feed family's validation predicate is renamed onto the
//! destination, so readers never observe a partial artifact and a failed
//! re-fetch leaves the previous copy untouched.

use crate::config::{HttpConfig, RetryConfig};
use crate::error::{FetchError, Result};
use crate::feed::FeedFamily;
use crate::retry::with_backoff;
use crate::types::{ArtifactLocator, StoredArtifact};
use crate::verify::is_stale_digest;
use reqwest::header::HeaderMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Suffix of in-progress downloads
pub const PARTIAL_SUFFIX: &str = ".part";

/// Log download progress every this many bytes
const PROGRESS_LOG_INTERVAL: u64 = 8 * 1024 * 1024;

/// Build the HTTP client shared by the catalog and the fetcher
pub fn build_client(http: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(http.timeout)
        .user_agent(http.user_agent.clone())
        .build()?;
    Ok(client)
}

/// What a fetch left in the store
#[derive(Debug)]
pub enum FetchResult {
    /// The remote advertised the digest of the local copy; nothing was written
    UpToDate,
    /// A new artifact was written
    Stored(StoredArtifact),
}

/// Downloads single artifacts for one feed family
pub struct ArtifactFetcher {
    client: reqwest::Client,
    family: FeedFamily,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl ArtifactFetcher {
    /// Create a fetcher. `api_key` is sent only for families that use one.
    pub fn new(
        client: reqwest::Client,
        family: FeedFamily,
        api_key: Option<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            family,
            api_key,
            retry,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, url);
        if let (Some(header), Some(key)) = (self.family.api_key_header(), &self.api_key) {
            request = request.header(header, key);
        }
        request
    }

    fn advertised_digest(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.family.digest_header())
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
    }

    /// Ask the remote for the artifact's digest without downloading it.
    ///
    /// Returns `None` when the HEAD request fails, is refused, or carries no
    /// digest header; the caller then falls back to the GET response.
    pub async fn probe_digest(&self, locator: &ArtifactLocator) -> Option<String> {
        let response = match self
            .request(reqwest::Method::HEAD, &locator.remote_url)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(identifier = %locator.identifier, error = %e, "HEAD probe failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(
                identifier = %locator.identifier,
                status = response.status().as_u16(),
                "HEAD probe refused"
            );
            return None;
        }

        self.advertised_digest(response.headers())
    }

    /// Download `locator` to `dest`, retrying transient failures.
    ///
    /// When `local_digest` is given and the response advertises the same
    /// digest, the body is not read and [`FetchResult::UpToDate`] is returned.
    pub async fn fetch(
        &self,
        locator: &ArtifactLocator,
        dest: &Path,
        local_digest: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchResult, FetchError> {
        with_backoff(&self.retry, cancel, move || {
            self.fetch_once(locator, dest, local_digest, cancel)
        })
        .await
    }

    async fn fetch_once(
        &self,
        locator: &ArtifactLocator,
        dest: &Path,
        local_digest: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchResult, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        debug!(identifier = %locator.identifier, url = %locator.remote_url, "requesting artifact");
        let mut response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.request(reqwest::Method::GET, &locator.remote_url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let remote_digest = self.advertised_digest(response.headers());
        if local_digest.is_some() && !is_stale_digest(local_digest, remote_digest.as_deref()) {
            debug!(identifier = %locator.identifier, "local copy matches advertised digest");
            return Ok(FetchResult::UpToDate);
        }

        let expected_len = response.content_length();
        let temp_path = partial_path(dest);
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|source| FetchError::Write {
                path: temp_path.clone(),
                source,
            })?;

        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut next_progress = PROGRESS_LOG_INTERVAL;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    drop(file);
                    remove_partial(&temp_path).await;
                    return Err(FetchError::Cancelled);
                }
                chunk = response.chunk() => chunk,
            };

            let chunk = match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    remove_partial(&temp_path).await;
                    return Err(FetchError::Network(e));
                }
            };

            if let Err(source) = file.write_all(&chunk).await {
                drop(file);
                remove_partial(&temp_path).await;
                return Err(FetchError::Write {
                    path: temp_path,
                    source,
                });
            }
            hasher.update(&chunk);
            written += chunk.len() as u64;

            if written >= next_progress {
                next_progress += PROGRESS_LOG_INTERVAL;
                match expected_len {
                    Some(total) if total > 0 => debug!(
                        identifier = %locator.identifier,
                        percent = %format!("{:.2}", written as f64 / total as f64 * 100.0),
                        "download progress"
                    ),
                    _ => debug!(identifier = %locator.identifier, bytes = written, "download progress"),
                }
            }
        }

        if let Err(source) = finish_file(file).await {
            remove_partial(&temp_path).await;
            return Err(FetchError::Write {
                path: temp_path,
                source,
            });
        }

        if let Err(e) = self.family.validate_body(written) {
            remove_partial(&temp_path).await;
            return Err(e);
        }

        if let Err(source) = tokio::fs::rename(&temp_path, dest).await {
            remove_partial(&temp_path).await;
            return Err(FetchError::Write {
                path: dest.to_path_buf(),
                source,
            });
        }

        let digest = format!("{:x}", hasher.finalize());
        if let Some(remote) = remote_digest.as_deref()
            && remote != digest
        {
            warn!(
                identifier = %locator.identifier,
                remote_digest = remote,
                local_digest = %digest,
                "downloaded bytes differ from advertised digest"
            );
        }

        info!(
            identifier = %locator.identifier,
            path = %dest.display(),
            bytes = written,
            "artifact downloaded"
        );

        Ok(FetchResult::Stored(StoredArtifact {
            path: dest.to_path_buf(),
            size_bytes: written,
            digest,
        }))
    }
}

/// Temp path a download of `dest` is streamed into
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

async fn finish_file(mut file: tokio::fs::File) -> std::io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove partial download");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{VULNERS_API_KEY_HEADER, VULNERS_PLACEHOLDER_LEN};
    use crate::verify::bytes_digest;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    fn locator(server: &MockServer, name: &str) -> ArtifactLocator {
        ArtifactLocator {
            identifier: name.to_string(),
            remote_url: format!("{}/feeds/{}", server.uri(), name),
            year_tag: None,
            file_name: name.to_string(),
        }
    }

    fn nvd_fetcher() -> ArtifactFetcher {
        ArtifactFetcher::new(reqwest::Client::new(), FeedFamily::Nvd, None, no_retry())
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/store/nvdcve-1.1-2019.json.zip")),
            PathBuf::from("/store/nvdcve-1.1-2019.json.zip.part")
        );
    }

    #[tokio::test]
    async fn fetch_writes_body_and_reports_digest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/a.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"artifact-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.zip");
        let result = nvd_fetcher()
            .fetch(&locator(&server, "a.zip"), &dest, None, &CancellationToken::new())
            .await
            .unwrap();

        match result {
            FetchResult::Stored(artifact) => {
                assert_eq!(artifact.path, dest);
                assert_eq!(artifact.size_bytes, 14);
                assert_eq!(artifact.digest, bytes_digest(b"artifact-bytes"));
            }
            other => panic!("expected Stored, got {other:?}"),
        }
        assert_eq!(std::fs::read(&dest).unwrap(), b"artifact-bytes");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn fetch_sends_client_identifier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/a.zip"))
            .and(header("user-agent", "vulnfeed-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let http = HttpConfig {
            user_agent: "vulnfeed-test/1.0".into(),
            ..Default::default()
        };
        let fetcher =
            ArtifactFetcher::new(build_client(&http).unwrap(), FeedFamily::Nvd, None, no_retry());
        let dir = TempDir::new().unwrap();

        fetcher
            .fetch(
                &locator(&server, "a.zip"),
                &dir.path().join("a.zip"),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fetch_skips_body_when_advertised_digest_matches() {
        let server = MockServer::start().await;
        let digest = bytes_digest(b"old");
        Mock::given(method("GET"))
            .and(path("/feeds/a.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Content-SHA256", digest.as_str())
                    .set_body_bytes(b"new".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.zip");
        std::fs::write(&dest, b"old").unwrap();

        let result = nvd_fetcher()
            .fetch(
                &locator(&server, "a.zip"),
                &dest,
                Some(&digest),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(result, FetchResult::UpToDate));
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
    }

    #[tokio::test]
    async fn not_found_is_status_error_and_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/missing.zip"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing.zip");
        let err = nvd_fetcher()
            .fetch(
                &locator(&server, "missing.zip"),
                &dest,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404 }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/flaky.zip"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feeds/flaky.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let retry = RetryConfig {
            max_attempts: 2,
            ..no_retry()
        };
        let fetcher = ArtifactFetcher::new(reqwest::Client::new(), FeedFamily::Nvd, None, retry);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("flaky.zip");

        let result = fetcher
            .fetch(&locator(&server, "flaky.zip"), &dest, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(result, FetchResult::Stored(_)));
        assert_eq!(std::fs::read(&dest).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn rate_limited_request_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/busy.zip"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feeds/busy.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let retry = RetryConfig {
            max_attempts: 1,
            ..no_retry()
        };
        let fetcher = ArtifactFetcher::new(reqwest::Client::new(), FeedFamily::Nvd, None, retry);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("busy.zip");

        let result = fetcher
            .fetch(&locator(&server, "busy.zip"), &dest, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(result, FetchResult::Stored(_)));
    }

    #[tokio::test]
    async fn cancel_while_backing_off_sends_no_further_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/down.zip"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let fetcher = ArtifactFetcher::new(reqwest::Client::new(), FeedFamily::Nvd, None, retry);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("down.zip");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let start = std::time::Instant::now();

        let err = fetcher
            .fetch(&locator(&server, "down.zip"), &dest, None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn vulners_placeholder_body_is_removed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/archive/collection/"))
            .and(query_param("type", "saint"))
            .and(header(VULNERS_API_KEY_HEADER, "secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![b'x'; VULNERS_PLACEHOLDER_LEN as usize]),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = ArtifactFetcher::new(
            reqwest::Client::new(),
            FeedFamily::VulnersArchive,
            Some("secret".into()),
            no_retry(),
        );
        let loc = ArtifactLocator {
            identifier: "saint".into(),
            remote_url: format!("{}/api/v3/archive/collection/?type=saint", server.uri()),
            year_tag: None,
            file_name: "saint.json".into(),
        };
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("saint.json");

        let err = fetcher
            .fetch(&loc, &dest, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::InvalidBody { len: 131 }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn rejected_refetch_keeps_previous_copy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/saint.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![b'x'; VULNERS_PLACEHOLDER_LEN as usize]),
            )
            .mount(&server)
            .await;

        let fetcher = ArtifactFetcher::new(
            reqwest::Client::new(),
            FeedFamily::VulnersArchive,
            Some("secret".into()),
            no_retry(),
        );
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("saint.json");
        std::fs::write(&dest, b"{\"previous\": true}").unwrap();

        let result = fetcher
            .fetch(
                &locator(&server, "saint.json"),
                &dest,
                Some("stale"),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&dest).unwrap(), b"{\"previous\": true}");
    }

    #[tokio::test]
    async fn cancelled_token_prevents_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let dir = TempDir::new().unwrap();

        let err = nvd_fetcher()
            .fetch(&locator(&server, "a.zip"), &dir.path().join("a.zip"), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn probe_digest_reads_head_header() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/feeds/a.zip"))
            .respond_with(ResponseTemplate::new(200).insert_header("X-Content-SHA256", "abc"))
            .mount(&server)
            .await;

        let digest = nvd_fetcher().probe_digest(&locator(&server, "a.zip")).await;
        assert_eq!(digest.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn probe_digest_is_none_when_head_refused() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        assert!(
            nvd_fetcher()
                .probe_digest(&locator(&server, "a.zip"))
                .await
                .is_none()
        );
    }
}
