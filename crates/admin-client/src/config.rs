//! Client configuration loading
//!
//! Config precedence: env vars > config file > defaults. Only the base URL
//! has an env override (`ADMIN_API_BASE_URL`), matching how deployments
//! point the same build at staging or production.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration for the admin API client.
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
}

/// Backend connection settings.
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Backend root, e.g. `https://api.example.com`. Endpoint prefixes
    /// (`/api/v1`, `/api/v1/admin`) are appended by the client.
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Session persistence settings.
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Where the credential file lives.
    pub credentials_path: PathBuf,
}

fn default_timeout() -> u64 {
    30
}

impl ClientConfig {
    /// Load configuration from a TOML file, then overlay environment
    /// variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: ClientConfig = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("ADMIN_API_BASE_URL") {
            config.api.base_url = url;
        }

        // Validate base_url is http(s)
        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        // Validate timeout_secs is non-zero
        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        // Endpoint prefixes are appended with a leading slash
        while config.api.base_url.ends_with('/') {
            config.api.base_url.pop();
        }

        Ok(config)
    }
}
