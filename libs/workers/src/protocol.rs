//! The worker turn exchange.
//!
//! One POST per tick to `<endpoint>/turn/` carrying the player's view of
//! the world. The body is opaque to this crate. The worker answers with:
//!
//! ```json
//! {"action": {...}, "log": "...", "avatar_updated": false}
//! ```
//!
//! `action` and `log` may be `null`; all three keys must be present.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::WorkerError;

pub const ACTION_FIELD: &str = "action";
pub const LOG_FIELD: &str = "log";
pub const CODE_UPDATED_FIELD: &str = "avatar_updated";

/// Build the turn URL for a worker endpoint.
pub fn turn_url(endpoint: &str) -> String {
    format!("{}/turn/", endpoint.trim_end_matches('/'))
}

/// A worker's answer for one tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnResponse {
    pub action: Option<Value>,
    pub log: Option<Value>,
    pub code_updated: bool,
}

impl TurnResponse {
    /// Extract a turn response from a decoded body.
    pub fn from_json(body: Value) -> Result<Self, WorkerError> {
        let mut map = match body {
            Value::Object(map) => map,
            other => {
                return Err(WorkerError::Decode(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let action = map
            .remove(ACTION_FIELD)
            .ok_or(WorkerError::MissingField(ACTION_FIELD))?;
        let log = map
            .remove(LOG_FIELD)
            .ok_or(WorkerError::MissingField(LOG_FIELD))?;
        let code_updated = map
            .remove(CODE_UPDATED_FIELD)
            .ok_or(WorkerError::MissingField(CODE_UPDATED_FIELD))?;

        let code_updated = code_updated.as_bool().ok_or_else(|| {
            WorkerError::Decode(format!(
                "{CODE_UPDATED_FIELD} must be a boolean, got {}",
                json_kind(&code_updated)
            ))
        })?;

        Ok(Self {
            action: non_null(action),
            log: non_null(log),
            code_updated,
        })
    }
}

/// POST `state` to a worker's turn URL and decode the answer.
///
/// `timeout` bounds the whole exchange, including reading the body.
pub async fn request_turn(
    client: &reqwest::Client,
    url: &str,
    state: &Value,
    timeout: Duration,
) -> Result<TurnResponse, WorkerError> {
    debug!(url = %url, "Requesting worker turn");

    // The request timeout covers the body too, but keep an outer bound so
    // a stalled stream can never hold the tick.
    match tokio::time::timeout(timeout, exchange(client, url, state, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Timeout(timeout)),
    }
}

async fn exchange(
    client: &reqwest::Client,
    url: &str,
    state: &Value,
    timeout: Duration,
) -> Result<TurnResponse, WorkerError> {
    let response = client
        .post(url)
        .json(state)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| WorkerError::from_reqwest(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        return Err(WorkerError::Status(status));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| WorkerError::from_reqwest(e, timeout))?;
    let body: Value = serde_json::from_slice(&body)?;
    TurnResponse::from_json(body)
}

fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
