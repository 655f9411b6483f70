//! API key lookup
//!
//! Credentials are resolved once by the caller and handed to
//! [`SyncOrchestrator::new`](crate::sync::SyncOrchestrator::new); the library
//! never reads them from global state during a run.

use crate::error::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable holding the Vulners API key
pub const API_KEY_VAR: &str = "VULNERS_API_KEY";

/// Source of an API key
pub trait CredentialProvider {
    /// The API key, if this provider has one
    fn api_key(&self) -> Option<String>;
}

/// Reads the API key from the process environment, then from a `.env` file
#[derive(Clone, Debug)]
pub struct EnvCredentials {
    env_file: Option<PathBuf>,
    var_name: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self {
            env_file: Some(PathBuf::from(".env")),
            var_name: API_KEY_VAR.to_string(),
        }
    }
}

impl EnvCredentials {
    /// Look in `env_file` after the process environment
    pub fn with_env_file(mut self, env_file: impl Into<PathBuf>) -> Self {
        self.env_file = Some(env_file.into());
        self
    }

    /// Only consult the process environment
    pub fn without_env_file(mut self) -> Self {
        self.env_file = None;
        self
    }

    /// Read a different variable name
    pub fn var_name(mut self, name: impl Into<String>) -> Self {
        self.var_name = name.into();
        self
    }

    fn read_env_file(&self, path: &Path) -> Option<String> {
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no usable .env file");
                return None;
            }
        };

        for item in iter {
            match item {
                Ok((key, value)) if key == self.var_name => return Some(value),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed .env line");
                }
            }
        }
        None
    }
}

impl CredentialProvider for EnvCredentials {
    fn api_key(&self) -> Option<String> {
        if let Ok(value) = std::env::var(&self.var_name)
            && !value.trim().is_empty()
        {
            return Some(value);
        }

        self.env_file
            .as_deref()
            .and_then(|path| self.read_env_file(path))
            .filter(|value| !value.trim().is_empty())
    }
}

/// Pick the API key: an explicit value wins over the provider
pub fn resolve_api_key(
    explicit: Option<String>,
    provider: &dyn CredentialProvider,
) -> Option<String> {
    explicit
        .filter(|key| !key.trim().is_empty())
        .or_else(|| provider.api_key())
}

/// Append `VULNERS_API_KEY=<key>` to `env_file`, creating it if needed
pub fn persist_api_key(env_file: &Path, key: &str) -> Result<()> {
    let needs_newline = std::fs::read(env_file)
        .map(|content| !content.is_empty() && !content.ends_with(b"\n"))
        .unwrap_or(false);

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(env_file)?;
    if needs_newline {
        writeln!(file)?;
    }
    writeln!(file, "{}={}", API_KEY_VAR, key)?;

    info!(path = %env_file.display(), "API key saved");
    Ok(())
}
