//! Game backend interface and mock implementation.
//!
//! A backend turns "this game should exist" into real compute: a local
//! process, a container deployment, and so on. The controller only ever
//! talks to this trait, and only by game id. Deletion must work from the
//! id alone since the controller keeps no configuration around.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use arena_id::GameId;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

/// Configuration of one game as published in the desired state.
pub type EntityConfig = serde_json::Map<String, Value>;

/// Game backend interface.
///
/// Both operations may fail. Conditions such as "already exists" are for
/// the backend to resolve; the controller logs and moves on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start a game with the given (augmented) configuration.
    async fn create(&self, game_id: &GameId, config: &EntityConfig) -> Result<()>;

    /// Tear down everything belonging to a game.
    async fn delete(&self, game_id: &GameId) -> Result<()>;
}

/// A call observed by [`MockBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Create(GameId, EntityConfig),
    Delete(GameId),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<BackendCall>,
    running: BTreeSet<GameId>,
    fail_creates: BTreeSet<GameId>,
    fail_deletes: BTreeSet<GameId>,
}

/// Mock backend for testing and development.
///
/// Records every call, tracks which games are "running", and can be told
/// to fail for particular ids.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    delay: Duration,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call take `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make creates for `game_id` fail until cleared.
    pub fn fail_create_for(&self, game_id: &GameId) {
        self.lock().fail_creates.insert(game_id.clone());
    }

    /// Make deletes for `game_id` fail until cleared.
    pub fn fail_delete_for(&self, game_id: &GameId) {
        self.lock().fail_deletes.insert(game_id.clone());
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_creates.clear();
        state.fail_deletes.clear();
    }

    /// Every call so far, in the order they completed.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Ids passed to `create`, successful or not.
    pub fn creates(&self) -> Vec<GameId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Create(id, _) => Some(id.clone()),
                BackendCall::Delete(_) => None,
            })
            .collect()
    }

    /// Ids passed to `delete`, successful or not.
    pub fn deletes(&self) -> Vec<GameId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Delete(id) => Some(id.clone()),
                BackendCall::Create(..) => None,
            })
            .collect()
    }

    /// Configuration passed to the most recent create for `game_id`.
    pub fn created_config(&self, game_id: &GameId) -> Option<EntityConfig> {
        self.lock().calls.iter().rev().find_map(|call| match call {
            BackendCall::Create(id, config) if id == game_id => Some(config.clone()),
            _ => None,
        })
    }

    /// Games currently "running".
    pub fn running(&self) -> BTreeSet<GameId> {
        self.lock().running.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn create(&self, game_id: &GameId, config: &EntityConfig) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut state = self.lock();
        state
            .calls
            .push(BackendCall::Create(game_id.clone(), config.clone()));

        if state.fail_creates.contains(game_id) {
            anyhow::bail!("Mock backend configured to fail creating game {game_id}");
        }

        info!(game_id = %game_id, "[MOCK] Game started");
        state.running.insert(game_id.clone());
        Ok(())
    }

    async fn delete(&self, game_id: &GameId) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut state = self.lock();
        state.calls.push(BackendCall::Delete(game_id.clone()));

        if state.fail_deletes.contains(game_id) {
            anyhow::bail!("Mock backend configured to fail deleting game {game_id}");
        }

        if state.running.remove(game_id) {
            info!(game_id = %game_id, "[MOCK] Game removed");
        } else {
            debug!(game_id = %game_id, "[MOCK] Nothing to remove");
        }
        Ok(())
    }
}
