//! One player's worker and its last known answer.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arena_id::PlayerId;
use serde_json::Value;
use tracing::{error, info};

use crate::error::WorkerError;
use crate::protocol::{self, TurnResponse};

/// What the game knows about a worker between ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerState {
    /// Action from the last successful fetch.
    pub action: Option<Value>,

    /// Log output from the last successful fetch.
    pub log: Option<Value>,

    /// Whether the worker reported new code on the last successful fetch.
    pub code_updated: bool,

    /// Player code last pushed to this worker.
    pub code: Option<String>,
}

impl WorkerState {
    /// Forget the last answer, keeping the cached code.
    fn reset_turn(&mut self) {
        self.action = None;
        self.log = None;
        self.code_updated = false;
    }

    fn apply_turn(&mut self, turn: TurnResponse) {
        self.action = turn.action;
        self.log = turn.log;
        self.code_updated = turn.code_updated;
    }
}

/// Handle to a single remote worker.
///
/// Fields are overwritten on every fetch. A failed fetch never leaves the
/// previous tick's answer behind.
#[derive(Debug)]
pub struct WorkerHandle {
    player_id: PlayerId,
    turn_url: String,
    state: Mutex<WorkerState>,
}

impl WorkerHandle {
    /// Create a handle for a worker listening at `endpoint`.
    pub fn new(player_id: PlayerId, endpoint: &str) -> Self {
        Self {
            player_id,
            turn_url: protocol::turn_url(endpoint),
            state: Mutex::new(WorkerState::default()),
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn turn_url(&self) -> &str {
        &self.turn_url
    }

    /// Copy of the current state.
    pub fn state(&self) -> WorkerState {
        self.lock().clone()
    }

    pub fn action(&self) -> Option<Value> {
        self.lock().action.clone()
    }

    pub fn log(&self) -> Option<Value> {
        self.lock().log.clone()
    }

    pub fn code_updated(&self) -> bool {
        self.lock().code_updated
    }

    pub fn code(&self) -> Option<String> {
        self.lock().code.clone()
    }

    pub fn set_code(&self, code: String) {
        self.lock().code = Some(code);
    }

    pub fn clear_log(&self) {
        self.lock().log = None;
    }

    /// Ask the worker for this tick's action.
    ///
    /// Never fails: on any error the handle is reset to no action, no log
    /// and no code update, and the error is logged.
    pub async fn fetch(&self, client: &reqwest::Client, world_state: &Value, timeout: Duration) {
        let result = protocol::request_turn(client, &self.turn_url, world_state, timeout).await;

        let mut state = self.lock();
        match result {
            Ok(turn) => state.apply_turn(turn),
            Err(e) => {
                self.log_failure(&e);
                state.reset_turn();
            }
        }
    }

    fn log_failure(&self, err: &WorkerError) {
        match err {
            WorkerError::Unreachable(_) => {
                info!(
                    player_id = %self.player_id,
                    "Could not connect to worker, probably not ready yet"
                );
            }
            WorkerError::MissingField(field) => {
                error!(
                    player_id = %self.player_id,
                    field = %field,
                    "Missing key in data from worker"
                );
            }
            other => {
                error!(
                    player_id = %self.player_id,
                    url = %self.turn_url,
                    error = ?other,
                    "Unknown error while fetching turn data"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
