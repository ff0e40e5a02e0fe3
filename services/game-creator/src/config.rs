//! Configuration for the game creator.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::controller::ReconcilerConfig;

/// Which backend runs the games.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// One local child process per game.
    Process,
    /// In-memory mock, for development.
    Mock,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "mock" => Ok(Self::Mock),
            other => anyhow::bail!("unknown backend {other:?}, expected \"process\" or \"mock\""),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Process => write!(f, "process"),
            BackendKind::Mock => write!(f, "mock"),
        }
    }
}

/// Game creator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Desired state document URL; also the callback base for games.
    pub games_url: String,

    /// Idle delay between reconciliation passes.
    pub poll_interval: Duration,

    /// Backend operations in flight per batch.
    pub concurrency: usize,

    /// Bound on the desired state fetch and on each backend call.
    pub request_timeout: Duration,

    /// Backend running the games.
    pub backend: BackendKind,

    /// Program and leading arguments launched per game by the process backend.
    pub game_command: Vec<String>,

    /// Host the process backend binds games to.
    pub game_host: String,

    /// Recreate tracked games whose desired configuration changed.
    pub recreate_on_config_change: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let games_url = lookup("ARENA_GAMES_URL")
            .unwrap_or_else(|| "http://localhost:8000/players/api/games/".to_string());

        let poll_interval_secs: u64 = parse_or(&lookup, "ARENA_POLL_INTERVAL_SECS", 10)?;
        let concurrency: usize = parse_or(&lookup, "ARENA_CONCURRENCY", 3)?;
        if concurrency == 0 {
            anyhow::bail!("ARENA_CONCURRENCY must be at least 1");
        }
        let request_timeout_secs: u64 = parse_or(&lookup, "ARENA_REQUEST_TIMEOUT_SECS", 10)?;

        let backend = match lookup("ARENA_BACKEND") {
            Some(value) => value.parse()?,
            None => BackendKind::Process,
        };

        let game_command: Vec<String> = lookup("ARENA_GAME_COMMAND")
            .unwrap_or_else(|| "arena-game".to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if game_command.is_empty() {
            anyhow::bail!("ARENA_GAME_COMMAND must not be empty");
        }

        let game_host = lookup("ARENA_GAME_HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let recreate_on_config_change = match lookup("ARENA_RECREATE_ON_CONFIG_CHANGE") {
            Some(value) => parse_flag("ARENA_RECREATE_ON_CONFIG_CHANGE", &value)?,
            None => false,
        };

        let log_level = lookup("ARENA_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            games_url,
            poll_interval: Duration::from_secs(poll_interval_secs),
            concurrency,
            request_timeout: Duration::from_secs(request_timeout_secs),
            backend,
            game_command,
            game_host,
            recreate_on_config_change,
            log_level,
        })
    }

    /// Settings for the reconciliation loop.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: self.poll_interval,
            concurrency: self.concurrency,
            backend_timeout: self.request_timeout,
            callback_base_url: self.games_url.clone(),
            recreate_on_config_change: self.recreate_on_config_change,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => anyhow::bail!("invalid value for {key}: {value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.games_url, "http://localhost:8000/players/api/games/");
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.backend, BackendKind::Process);
        assert_eq!(config.game_command, vec!["arena-game"]);
        assert!(!config.recreate_on_config_change);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("ARENA_GAMES_URL", "http://front:8000/games/"),
            ("ARENA_POLL_INTERVAL_SECS", "2"),
            ("ARENA_CONCURRENCY", "8"),
            ("ARENA_BACKEND", "MOCK"),
            ("ARENA_GAME_COMMAND", "python service.py"),
            ("ARENA_RECREATE_ON_CONFIG_CHANGE", "true"),
        ])
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.backend, BackendKind::Mock);
        assert_eq!(config.game_command, vec!["python", "service.py"]);

        let reconciler = config.reconciler_config();
        assert_eq!(reconciler.concurrency, 8);
        assert_eq!(reconciler.callback_base_url, "http://front:8000/games/");
        assert!(reconciler.recreate_on_config_change);
    }

    #[rstest]
    #[case("ARENA_POLL_INTERVAL_SECS", "soon")]
    #[case("ARENA_CONCURRENCY", "0")]
    #[case("ARENA_REQUEST_TIMEOUT_SECS", "-1")]
    #[case("ARENA_BACKEND", "kubernetes")]
    #[case("ARENA_GAME_COMMAND", "   ")]
    #[case("ARENA_RECREATE_ON_CONFIG_CHANGE", "maybe")]
    fn test_invalid_values_rejected(#[case] key: &str, #[case] value: &str) {
        assert!(load(&[(key, value)]).is_err());
    }
}
