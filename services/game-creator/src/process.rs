//! Local process backend.
//!
//! Runs each game as a child process on this host, for development and
//! single-machine deployments. The game program is invoked as
//! `<program> <args..> <host> <port>` with the game configuration in its
//! environment.

use std::collections::HashMap;

use anyhow::{Context, Result};
use arena_id::GameId;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{Backend, EntityConfig};

/// First port handed out to games.
pub const BASE_PORT: u16 = 6001;

/// Port distance between numbered games.
pub const PORT_STRIDE: u32 = 1000;

/// Stable port of a numbered game: `6001 + id * 1000`, if it fits.
pub fn numbered_port(game_id: &GameId) -> Option<u16> {
    game_id
        .as_str()
        .parse::<u32>()
        .ok()
        .and_then(|n| n.checked_mul(PORT_STRIDE))
        .and_then(|offset| offset.checked_add(u32::from(BASE_PORT)))
        .and_then(|port| u16::try_from(port).ok())
}

/// Returns true if `port` belongs to the numbered scheme.
fn is_numbered_port(port: u16) -> bool {
    port >= BASE_PORT && u32::from(port - BASE_PORT) % PORT_STRIDE == 0
}

/// Ports held by live games.
///
/// Numbered games always get their stable port. Every other game gets the
/// lowest free port above [`BASE_PORT`] outside the numbered scheme, so a
/// released port is reused and the two schemes never overlap.
#[derive(Debug, Default)]
pub struct PortAllocator {
    assigned: HashMap<GameId, u16>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a port to `game_id`, returning its current one if it has one.
    pub fn assign(&mut self, game_id: &GameId) -> Result<u16> {
        if let Some(port) = self.assigned.get(game_id) {
            return Ok(*port);
        }

        let port = match numbered_port(game_id) {
            Some(port) if !self.in_use(port) => port,
            Some(port) => anyhow::bail!("port {port} for game {game_id} is already in use"),
            None => (BASE_PORT + 1..=u16::MAX)
                .find(|port| !is_numbered_port(*port) && !self.in_use(*port))
                .with_context(|| format!("no free port left for game {game_id}"))?,
        };

        self.assigned.insert(game_id.clone(), port);
        Ok(port)
    }

    /// Free the port held by `game_id`.
    pub fn release(&mut self, game_id: &GameId) -> Option<u16> {
        self.assigned.remove(game_id)
    }

    pub fn port(&self, game_id: &GameId) -> Option<u16> {
        self.assigned.get(game_id).copied()
    }

    fn in_use(&self, port: u16) -> bool {
        self.assigned.values().any(|p| *p == port)
    }
}

#[derive(Default)]
struct LocalGames {
    children: HashMap<GameId, Child>,
    ports: PortAllocator,
}

/// Backend running one child process per game.
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
    host: String,
    games: Mutex<LocalGames>,
}

impl ProcessBackend {
    /// Create a backend launching `program` with leading `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>, host: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            host: host.into(),
            games: Mutex::new(LocalGames::default()),
        }
    }

    /// Port a running game listens on.
    pub async fn port_of(&self, game_id: &GameId) -> Option<u16> {
        self.games.lock().await.ports.port(game_id)
    }

    /// Number of games with a live child handle.
    pub async fn running_count(&self) -> usize {
        self.games.lock().await.children.len()
    }
}

/// Render a config value as an environment variable value.
fn env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    async fn create(&self, game_id: &GameId, config: &EntityConfig) -> Result<()> {
        let mut games = self.games.lock().await;
        if games.children.contains_key(game_id) {
            anyhow::bail!("game {game_id} already exists");
        }

        let port = games.ports.assign(game_id)?;
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.host)
            .arg(port.to_string())
            .envs(config.iter().map(|(k, v)| (k.as_str(), env_value(v))))
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                games.ports.release(game_id);
                return Err(e).with_context(|| {
                    format!("failed to spawn {} for game {game_id}", self.program)
                });
            }
        };

        info!(
            game_id = %game_id,
            pid = child.id(),
            url = %format!("http://{}:{}", self.host, port),
            "Game started"
        );
        games.children.insert(game_id.clone(), child);
        Ok(())
    }

    async fn delete(&self, game_id: &GameId) -> Result<()> {
        let child = {
            let mut games = self.games.lock().await;
            games.ports.release(game_id);
            games.children.remove(game_id)
        };

        let Some(mut child) = child else {
            debug!(game_id = %game_id, "No local process for game");
            return Ok(());
        };

        if let Err(e) = child.kill().await {
            // The child may already have exited on its own.
            warn!(game_id = %game_id, error = %e, "Failed to kill game process");
        }
        info!(game_id = %game_id, "Game process stopped");
        Ok(())
    }
}
