//! Environment configuration for object-store/queue backed deployments.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
}

/// Connection settings for the state bucket and work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Name of the state bucket (`STATE_BUCKET`).
    pub state_bucket: String,
    /// Key prefix for workflow blobs (`STATE_PREFIX`), normalized to end
    /// with `/`.
    pub state_prefix: String,
    /// Fully qualified queue URL (`QUEUE_URL`).
    pub queue_url: String,
}

impl StoreConfig {
    pub const DEFAULT_PREFIX: &'static str = "wf/";

    pub fn from_env() -> Result<Self, ConfigError> {
        let state_bucket =
            std::env::var("STATE_BUCKET").map_err(|_| ConfigError::MissingVar("STATE_BUCKET"))?;
        let state_prefix = std::env::var("STATE_PREFIX")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_PREFIX.to_string());
        let queue_url =
            std::env::var("QUEUE_URL").map_err(|_| ConfigError::MissingVar("QUEUE_URL"))?;

        Ok(Self {
            state_bucket,
            state_prefix: normalize_prefix(state_prefix),
            queue_url,
        })
    }
}

fn normalize_prefix(mut prefix: String) -> String {
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}
