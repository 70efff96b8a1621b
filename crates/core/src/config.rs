//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services, so
//! request handling never reads process-wide environment variables.

use crate::constants::DEFAULT_PUBLIC_BASE_URL;
use ckd_types::NonEmptyText;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidInput(String),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    public_base_url: NonEmptyText,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidInput` if `public_base_url` is blank or is not an
    /// `http(s)://` URL.
    pub fn new(public_base_url: impl AsRef<str>) -> ConfigResult<Self> {
        let public_base_url = NonEmptyText::new(public_base_url).map_err(|_| {
            ConfigError::InvalidInput("public base URL cannot be empty".into())
        })?;

        let url = public_base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidInput(format!(
                "public base URL must start with http:// or https://, got {url}"
            )));
        }

        Ok(Self { public_base_url })
    }

    /// Base URL that guest notification links point at.
    pub fn public_base_url(&self) -> &str {
        self.public_base_url.as_str()
    }
}

/// Resolve the public base URL from an optional environment value.
///
/// `None` or a blank value falls back to [`DEFAULT_PUBLIC_BASE_URL`].
pub fn config_from_env_value(public_base_url: Option<String>) -> ConfigResult<CoreConfig> {
    let value = public_base_url
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match value {
        Some(url) => CoreConfig::new(url),
        None => CoreConfig::new(DEFAULT_PUBLIC_BASE_URL),
    }
}

/// Read a small text file named by configuration (signing keys, seed files).
pub fn read_config_file(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}
