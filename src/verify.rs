//! Content digests and staleness decisions
//!
//! All digests are SHA-256 over the full file contents, hex-encoded in lower
//! case. Comparison against a remote-advertised digest is an exact string
//! comparison.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the hex-encoded SHA-256 of a file, streaming its contents
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex-encoded SHA-256 of an in-memory buffer
pub fn bytes_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decide staleness from an already computed local digest.
///
/// Anything other than an exact match with an advertised digest is stale,
/// including a remote that advertises nothing.
pub fn is_stale_digest(local_digest: Option<&str>, remote_digest: Option<&str>) -> bool {
    match (local_digest, remote_digest) {
        (Some(local), Some(remote)) => local != remote,
        _ => true,
    }
}

/// Decide whether the artifact at `local_path` must be re-fetched.
///
/// Missing or unreadable files are stale, as is any file whose digest differs
/// from `remote_digest` or when no digest is advertised.
pub fn is_stale(local_path: &Path, remote_digest: Option<&str>) -> bool {
    if !local_path.is_file() {
        return true;
    }

    match file_digest(local_path) {
        Ok(local) => is_stale_digest(Some(&local), remote_digest),
        Err(e) => {
            debug!(path = %local_path.display(), error = %e, "cannot digest local file, treating as stale");
            true
        }
    }
}
