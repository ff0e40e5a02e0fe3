//! Desired state source client.
//!
//! The web front end publishes every game that should be running as a
//! single JSON object: game id → game configuration object. The document
//! is fetched whole on every pass and never patched.

use std::collections::BTreeMap;
use std::time::Duration;

use arena_id::GameId;
use thiserror::Error;
use tracing::debug;

use crate::backend::EntityConfig;

/// Every game that should be running, keyed by id.
pub type DesiredState = BTreeMap<GameId, EntityConfig>;

/// Why a desired state document could not be obtained.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source could not be reached or timed out.
    #[error("failed to reach desired state source: {0}")]
    Transport(#[from] reqwest::Error),

    /// The source answered with a non-success status.
    #[error("desired state source returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The body was not an object of game configurations.
    #[error("invalid desired state document: {0}")]
    Decode(#[from] serde_json::Error),
}

/// HTTP client for the desired state document.
#[derive(Debug, Clone)]
pub struct DesiredStateClient {
    client: reqwest::Client,
    url: String,
}

impl DesiredStateClient {
    /// Create a client for `url` with a bound on each request.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current desired state.
    pub async fn fetch(&self) -> Result<DesiredState, FetchError> {
        debug!(url = %self.url, "Fetching desired state");

        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        let body = response.bytes().await?;
        let desired: DesiredState = serde_json::from_slice(&body)?;
        debug!(game_count = desired.len(), "Fetched desired state");

        Ok(desired)
    }
}
