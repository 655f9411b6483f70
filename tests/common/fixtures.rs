//! Mock feed servers and store fixtures

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use vulnfeed_sync::config::RetryConfig;
use vulnfeed_sync::{Config, FeedFamily};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock NVD listing page is served from
pub const LISTING_PATH: &str = "/vuln/data-feeds";

/// Hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Build an in-memory ZIP with the given members
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// NVD file name for a feed year
pub fn nvd_name(year: u16) -> String {
    format!("nvdcve-1.1-{}.json.zip", year)
}

/// Retry policy that never waits, so failures surface immediately
pub fn no_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        backoff_multiplier: 1.0,
        jitter: false,
    }
}

/// NVD configuration pointing at `server`
pub fn nvd_config(server: &MockServer, store: &Path) -> Config {
    let mut config = Config::for_family(FeedFamily::Nvd);
    config.feed.listing_url = format!("{}{}", server.uri(), LISTING_PATH);
    config.feed.download_base = format!("{}/feeds/json/cve/1.1/", server.uri());
    config.store.store_dir = Some(store.to_path_buf());
    config.retry = no_retry();
    config
}

/// Vulners configuration pointing at `server`
pub fn vulners_config(server: &MockServer, store: &Path, collections: &[&str]) -> Config {
    let mut config = Config::for_family(FeedFamily::VulnersArchive);
    config.feed.archive_base = format!("{}/api/v3/archive/collection/?type=", server.uri());
    config.feed.collections = collections.iter().map(|c| c.to_string()).collect();
    config.store.store_dir = Some(store.to_path_buf());
    config.retry = no_retry();
    config
}

/// Serve a listing page naming the given years
pub async fn mount_listing(server: &MockServer, years: &[u16]) {
    let body: String = years
        .iter()
        .map(|y| format!("<a href=\"/feeds/json/cve/1.1/{}\">ZIP</a>\n", nvd_name(*y)))
        .collect();
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Serve an NVD artifact on GET and HEAD, advertising its digest
pub async fn mount_nvd_artifact(server: &MockServer, year: u16, body: &[u8]) {
    let url_path = format!("/feeds/json/cve/1.1/{}", nvd_name(year));
    let digest = sha256_hex(body);
    Mock::given(method("HEAD"))
        .and(path(url_path.as_str()))
        .respond_with(ResponseTemplate::new(200).insert_header("X-Content-SHA256", digest.as_str()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(url_path.as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Content-SHA256", digest.as_str())
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

/// Serve a Vulners collection on GET and HEAD with the given advertised digest
pub async fn mount_collection(server: &MockServer, tag: &str, body: &[u8], digest: &str) {
    let url_path = "/api/v3/archive/collection/";
    Mock::given(method("HEAD"))
        .and(path(url_path))
        .and(query_param("type", tag))
        .respond_with(ResponseTemplate::new(200).insert_header("X-SHA256", digest))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(url_path))
        .and(query_param("type", tag))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-SHA256", digest)
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

/// Number of GET requests the server has received for `url_path`
pub async fn get_count(server: &MockServer, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.path() == url_path)
        .count()
}
