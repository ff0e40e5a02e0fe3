//! Errors from a single worker exchange.

use std::time::Duration;

use thiserror::Error;

/// Why a worker turn request produced no usable answer.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Nothing is listening at the worker endpoint yet.
    #[error("could not connect to worker: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// The worker did not answer in time.
    #[error("worker did not respond within {0:?}")]
    Timeout(Duration),

    /// The response was JSON but lacked an expected key.
    #[error("missing key in data from worker: {0}")]
    MissingField(&'static str),

    /// The worker answered with a non-success status.
    #[error("worker returned status {0}")]
    Status(reqwest::StatusCode),

    /// The response body was not the expected shape.
    #[error("invalid response from worker: {0}")]
    Decode(String),

    /// Any other transport failure.
    #[error("worker request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl WorkerError {
    /// Classify a transport error.
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Unreachable(err)
        } else {
            Self::Request(err)
        }
    }

    /// Returns true if the worker simply is not up yet.
    ///
    /// This is the expected state right after a player joins and is not
    /// worth more than an informational log line.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
