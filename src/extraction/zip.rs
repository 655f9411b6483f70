use crate::error::ExpandError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::ExpandSummary;

/// Expander for ZIP containers
pub struct ZipExpander;

impl ZipExpander {
    /// Expand every member of `archive_path` into `dest_path`.
    ///
    /// Fails only when the container itself cannot be opened or the
    /// destination cannot be created. Individual members that cannot be
    /// written are logged, cleaned up and counted in
    /// [`ExpandSummary::failed`].
    pub fn expand(archive_path: &Path, dest_path: &Path) -> Result<ExpandSummary, ExpandError> {
        debug!(?archive_path, ?dest_path, "expanding ZIP container");

        std::fs::create_dir_all(dest_path).map_err(|source| ExpandError::Destination {
            path: dest_path.to_path_buf(),
            source,
        })?;

        let file = File::open(archive_path).map_err(|e| ExpandError::Open {
            archive: archive_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut archive = zip::ZipArchive::new(file).map_err(|e| ExpandError::Open {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to read ZIP archive: {}", e),
        })?;

        let mut summary = ExpandSummary::default();

        for i in 0..archive.len() {
            let entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(?archive_path, index = i, error = %e, "failed to read ZIP entry");
                    summary.failed += 1;
                    continue;
                }
            };

            match Self::expand_entry(entry, dest_path) {
                Ok(Some(path)) => {
                    debug!(?path, "member extracted");
                    summary.extracted += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(?archive_path, index = i, error = %e, "skipping member");
                    summary.failed += 1;
                }
            }
        }

        info!(
            ?archive_path,
            extracted = summary.extracted,
            failed = summary.failed,
            "ZIP expansion finished"
        );

        Ok(summary)
    }

    /// Write one member to disk. Directories yield `Ok(None)`.
    fn expand_entry(
        mut entry: zip::read::ZipFile<'_>,
        dest_path: &Path,
    ) -> std::io::Result<Option<PathBuf>> {
        let member_path = match entry.enclosed_name() {
            Some(name) => dest_path.join(name),
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unsafe member name {:?}", entry.name()),
                ));
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&member_path)?;
            return Ok(None);
        }

        if let Some(parent) = member_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut outfile = File::create(&member_path)?;
        if let Err(e) = std::io::copy(&mut entry, &mut outfile) {
            drop(outfile);
            if let Err(remove_err) = std::fs::remove_file(&member_path) {
                debug!(?member_path, error = %remove_err, "failed to remove partial member");
            }
            return Err(e);
        }

        Ok(Some(member_path))
    }
}
