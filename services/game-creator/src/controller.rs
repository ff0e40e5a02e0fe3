//! Reconciliation loop for converging running games to the desired set.
//!
//! Each pass:
//! - Fetches the desired state document
//! - Diffs its ids against the tracked set
//! - Recreates added games and deletes removed ones, each as one bounded
//!   batch
//! - Sleeps for the poll interval, or stops early on shutdown
//!
//! A failed fetch skips the pass without touching the tracked set. A
//! failed backend call is logged and isolated to its game; the next pass
//! picks it up again.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arena_id::GameId;
use arena_reconcile::{
    BatchPool, ConfigHash, StateTracker, DEFAULT_CONCURRENCY, DEFAULT_RECONCILE_INTERVAL,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::backend::{Backend, EntityConfig};
use crate::client::{DesiredState, DesiredStateClient, FetchError};

/// Config key the callback URL is injected under.
pub const CALLBACK_URL_FIELD: &str = "GAME_API_URL";

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Idle delay between passes.
    pub poll_interval: Duration,

    /// Backend operations in flight per batch.
    pub concurrency: usize,

    /// Bound on each backend create/delete call.
    pub backend_timeout: Duration,

    /// Base URL games call back to; the game id is appended.
    pub callback_base_url: String,

    /// Recreate tracked games whose desired configuration changed.
    pub recreate_on_config_change: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_RECONCILE_INTERVAL,
            concurrency: DEFAULT_CONCURRENCY,
            backend_timeout: Duration::from_secs(10),
            callback_base_url: "http://localhost:8000/players/api/games/".to_string(),
            recreate_on_config_change: false,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Games newly tracked this pass.
    pub added: usize,

    /// Games dropped from tracking this pass.
    pub removed: usize,

    /// Tracked games recreated because an earlier create failed.
    pub retried: usize,

    /// Tracked games recreated because their configuration changed.
    pub changed: usize,

    /// Creates that failed.
    pub create_failures: usize,

    /// Deletes (of removed games) that failed.
    pub delete_failures: usize,
}

impl ReconcileStats {
    /// Returns true if the pass issued no backend calls.
    pub fn is_noop(&self) -> bool {
        self.added + self.removed + self.retried + self.changed == 0
    }
}

/// Controller-side bookkeeping that outlives a pass.
#[derive(Debug, Default)]
struct PassMemory {
    /// Games whose last create failed; recreated on the next pass.
    failed_creates: BTreeSet<GameId>,

    /// Hash of the configuration each game was last created with.
    applied: HashMap<GameId, ConfigHash>,
}

/// Reconciler for converging running games.
pub struct ReconciliationController {
    source: DesiredStateClient,
    backend: Arc<dyn Backend>,
    tracker: StateTracker<GameId>,
    memory: Mutex<PassMemory>,
    batch: BatchPool,
    config: ReconcilerConfig,
    span: Span,
}

impl ReconciliationController {
    /// Create a new reconciler.
    pub fn new(
        source: DesiredStateClient,
        backend: Arc<dyn Backend>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            source,
            backend,
            tracker: StateTracker::new(),
            memory: Mutex::new(PassMemory::default()),
            batch: BatchPool::new(config.concurrency),
            config,
            span: tracing::info_span!("reconciler"),
        }
    }

    /// Attach batch work to `span` instead of the default `reconciler` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The set of games this controller believes are running.
    pub fn tracker(&self) -> &StateTracker<GameId> {
        &self.tracker
    }

    /// Run the reconciliation loop until shutdown.
    ///
    /// The signal is checked before each pass and raced against the idle
    /// sleep. Dropping the sender also stops the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            url = %self.source.url(),
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            concurrency = self.batch.size(),
            "Starting reconciliation loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.reconcile_once().await {
                Ok(stats) if stats.is_noop() => debug!("Nothing to reconcile"),
                Ok(stats) => info!(
                    added = stats.added,
                    removed = stats.removed,
                    retried = stats.retried,
                    changed = stats.changed,
                    create_failures = stats.create_failures,
                    delete_failures = stats.delete_failures,
                    "Reconciliation pass complete"
                ),
                Err(e) => error!(error = %e, "Failed to obtain desired state, skipping pass"),
            }

            debug!("Sleeping");
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler shutting down");
    }

    /// Perform a single reconciliation pass.
    ///
    /// Returns an error only when the desired state could not be fetched,
    /// in which case nothing was changed. Backend failures are counted in
    /// the stats.
    pub async fn reconcile_once(&self) -> Result<ReconcileStats, FetchError> {
        debug!("Waking up");
        let desired = self.source.fetch().await?;

        let added = self.tracker.reconcile_adds(desired.keys());
        let removed = self.tracker.reconcile_removes(desired.keys());

        let mut stats = ReconcileStats {
            added: added.len(),
            removed: removed.len(),
            ..ReconcileStats::default()
        };

        let (retried, changed) = self.select_recreates(&desired, &added);
        stats.retried = retried.len();
        stats.changed = changed.len();

        if !added.is_empty() {
            debug!(games = ?added, "Need to add games");
        }
        if !changed.is_empty() {
            info!(games = ?changed, "Configuration changed, recreating games");
        }

        let to_create: Vec<(GameId, EntityConfig)> = added
            .iter()
            .chain(&retried)
            .chain(&changed)
            .filter_map(|id| {
                desired
                    .get(id)
                    .map(|config| (id.clone(), self.augment(id, config)))
            })
            .collect();

        let span = self.span.clone();
        let created = self
            .batch
            .run(to_create, move |(id, config)| {
                self.recreate(id, config).instrument(span.clone())
            })
            .await;
        stats.create_failures = self.record_creates(&desired, created);

        if !removed.is_empty() {
            debug!(games = ?removed, "Removing games");
        }

        let span = self.span.clone();
        let deleted = self
            .batch
            .run(removed, move |id| self.remove(id).instrument(span.clone()))
            .await;
        stats.delete_failures = self.record_deletes(deleted);

        Ok(stats)
    }

    /// Desired configuration plus the fields this controller injects.
    pub fn augment(&self, game_id: &GameId, config: &EntityConfig) -> EntityConfig {
        let mut augmented = config.clone();
        augmented.insert(
            CALLBACK_URL_FIELD.to_string(),
            Value::String(callback_url(&self.config.callback_base_url, game_id)),
        );
        augmented
    }

    /// Tracked games, not newly added, that need recreating this pass.
    ///
    /// Returns (earlier create failed, configuration changed).
    fn select_recreates(
        &self,
        desired: &DesiredState,
        added: &BTreeSet<GameId>,
    ) -> (BTreeSet<GameId>, BTreeSet<GameId>) {
        let mut memory = self.lock_memory();
        memory.failed_creates.retain(|id| desired.contains_key(id));

        let retried: BTreeSet<GameId> = memory
            .failed_creates
            .iter()
            .filter(|id| !added.contains(*id))
            .cloned()
            .collect();

        if !self.config.recreate_on_config_change {
            return (retried, BTreeSet::new());
        }

        let changed = desired
            .iter()
            .filter(|(id, _)| !added.contains(*id) && !retried.contains(*id))
            .filter(|(id, config)| {
                memory
                    .applied
                    .get(*id)
                    .is_some_and(|hash| *hash != ConfigHash::of(config))
            })
            .map(|(id, _)| id.clone())
            .collect();

        (retried, changed)
    }

    /// Remember which creates failed and what each success was built from.
    fn record_creates(&self, desired: &DesiredState, results: Vec<(GameId, bool)>) -> usize {
        let mut memory = self.lock_memory();
        let mut failures = 0;
        for (id, ok) in results {
            if ok {
                memory.failed_creates.remove(&id);
                if let Some(config) = desired.get(&id) {
                    memory.applied.insert(id, ConfigHash::of(config));
                }
            } else {
                failures += 1;
                memory.failed_creates.insert(id);
            }
        }
        failures
    }

    /// Forget removed games, re-tracking any whose delete failed.
    fn record_deletes(&self, results: Vec<(GameId, bool)>) -> usize {
        let failed: Vec<GameId> = {
            let mut memory = self.lock_memory();
            results
                .into_iter()
                .filter_map(|(id, ok)| {
                    if !ok {
                        return Some(id);
                    }
                    memory.failed_creates.remove(&id);
                    memory.applied.remove(&id);
                    None
                })
                .collect()
        };

        // Still running somewhere: track it again so the next pass, which
        // will not find it in the desired state, retries the delete.
        self.tracker.reconcile_adds(&failed);
        failed.len()
    }

    /// Delete then create a game. Neither half aborts the other.
    async fn recreate(&self, game_id: GameId, config: EntityConfig) -> (GameId, bool) {
        info!(game_id = %game_id, "Deleting game");
        if let Err(e) = self
            .call_backend("delete", self.backend.delete(&game_id))
            .await
        {
            warn!(game_id = %game_id, error = %e, "Failed to delete game before recreating");
        }

        info!(game_id = %game_id, "Recreating game");
        let ok = match self
            .call_backend("create", self.backend.create(&game_id, &config))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(game_id = %game_id, error = %e, "Failed to create game");
                false
            }
        };
        (game_id, ok)
    }

    async fn remove(&self, game_id: GameId) -> (GameId, bool) {
        info!(game_id = %game_id, "Removing game");
        let ok = match self
            .call_backend("delete", self.backend.delete(&game_id))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(game_id = %game_id, error = %e, "Failed to delete game");
                false
            }
        };
        (game_id, ok)
    }

    async fn call_backend<F>(&self, operation: &str, call: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        match tokio::time::timeout(self.config.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!(
                "backend {operation} timed out after {:?}",
                self.config.backend_timeout
            ),
        }
    }

    fn lock_memory(&self) -> MutexGuard<'_, PassMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// URL a game uses to reach back to the front end.
pub fn callback_url(base: &str, game_id: &GameId) -> String {
    format!("{}/{}/", base.trim_end_matches('/'), game_id)
}
