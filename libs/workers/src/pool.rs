//! Pool of worker handles keyed by player.
//!
//! Add, remove and fetch each run as one bounded batch and return only
//! when every item in the batch has been attempted. The map shape only
//! changes during add/remove; fetch mutates the handles it already holds.
//! Callers must not overlap an add/remove with a fetch on the same pool.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arena_id::PlayerId;
use arena_reconcile::{BatchPool, DEFAULT_CONCURRENCY};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::handle::WorkerHandle;
use crate::provisioner::WorkerProvisioner;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Operations in flight per batch.
    pub concurrency: usize,

    /// Bound on each worker turn request.
    pub request_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Pool of per-player workers.
pub struct WorkerPool {
    provisioner: Arc<dyn WorkerProvisioner>,
    workers: RwLock<HashMap<PlayerId, Arc<WorkerHandle>>>,
    client: reqwest::Client,
    batch: BatchPool,
    request_timeout: Duration,
    span: Span,
}

impl WorkerPool {
    /// Create an empty pool.
    pub fn new(provisioner: Arc<dyn WorkerProvisioner>, config: WorkerPoolConfig) -> Self {
        Self {
            provisioner,
            workers: RwLock::new(HashMap::new()),
            client: reqwest::Client::new(),
            batch: BatchPool::new(config.concurrency),
            request_timeout: config.request_timeout,
            span: tracing::info_span!("worker_pool"),
        }
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Attach batch work to `span` instead of the default `worker_pool` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Provision workers for players not already in the pool.
    ///
    /// A player whose provisioning fails is left out and logged; calling
    /// `add` again retries it.
    pub async fn add<I>(&self, player_ids: I)
    where
        I: IntoIterator<Item = PlayerId>,
    {
        let to_add: BTreeSet<PlayerId> = {
            let workers = self.workers.read().await;
            player_ids
                .into_iter()
                .filter(|id| {
                    let known = workers.contains_key(id);
                    if known {
                        debug!(player_id = %id, "Worker already in pool");
                    }
                    !known
                })
                .collect()
        };

        if to_add.is_empty() {
            return;
        }

        let span = self.span.clone();
        let provisioned = self
            .batch
            .run(to_add, move |id| self.provision_one(id).instrument(span.clone()))
            .await;

        // An overlapping add may have inserted the same player meanwhile;
        // the first handle in wins.
        let mut workers = self.workers.write().await;
        for handle in provisioned.into_iter().flatten() {
            match workers.entry(handle.player_id().clone()) {
                Entry::Occupied(_) => {
                    debug!(player_id = %handle.player_id(), "Worker added concurrently, keeping it");
                }
                Entry::Vacant(slot) => {
                    info!(
                        player_id = %handle.player_id(),
                        turn_url = %handle.turn_url(),
                        "Worker added"
                    );
                    slot.insert(handle);
                }
            }
        }
    }

    /// Tear down and evict the workers for `player_ids`.
    ///
    /// The handle is evicted even if the provisioner fails to discard the
    /// endpoint.
    pub async fn remove<I>(&self, player_ids: I)
    where
        I: IntoIterator<Item = PlayerId>,
    {
        let to_remove: Vec<PlayerId> = {
            let workers = self.workers.read().await;
            player_ids
                .into_iter()
                .filter(|id| {
                    let known = workers.contains_key(id);
                    if !known {
                        debug!(player_id = %id, "No worker to remove");
                    }
                    known
                })
                .collect()
        };

        let span = self.span.clone();
        self.batch
            .for_each(to_remove, move |id| self.remove_one(id).instrument(span.clone()))
            .await;
    }

    /// Fetch this tick's action from every worker that has a state.
    ///
    /// Workers with no entry in `states` are skipped. Failures are logged
    /// and reset the affected handle; nothing is returned to the caller.
    pub async fn fetch_all(&self, states: &HashMap<PlayerId, Value>) {
        let targets: Vec<(Arc<WorkerHandle>, &Value)> = {
            let workers = self.workers.read().await;
            workers
                .iter()
                .filter_map(|(id, handle)| match states.get(id) {
                    Some(state) => Some((Arc::clone(handle), state)),
                    None => {
                        debug!(player_id = %id, "No state supplied for worker, skipping");
                        None
                    }
                })
                .collect()
        };

        let client = &self.client;
        let timeout = self.request_timeout;
        let span = self.span.clone();
        self.batch
            .for_each(targets, move |(handle, state)| {
                async move { handle.fetch(client, state, timeout).await }.instrument(span.clone())
            })
            .await;
    }

    /// Last action of every worker, `None` where the last fetch failed.
    pub async fn actions(&self) -> HashMap<PlayerId, Option<Value>> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .map(|(id, handle)| (id.clone(), handle.action()))
            .collect()
    }

    /// Last log of every worker.
    pub async fn logs(&self) -> HashMap<PlayerId, Option<Value>> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .map(|(id, handle)| (id.clone(), handle.log()))
            .collect()
    }

    /// Players whose worker reported new code on the last fetch.
    pub async fn code_updated(&self) -> BTreeSet<PlayerId> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .filter(|(_, handle)| handle.code_updated())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Store new code for existing workers without replacing their handles.
    pub async fn update_code<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (PlayerId, String)>,
    {
        let workers = self.workers.read().await;
        for (id, code) in entries {
            match workers.get(&id) {
                Some(handle) => handle.set_code(code),
                None => warn!(player_id = %id, "Code update for unknown worker ignored"),
            }
        }
    }

    /// Code last stored for a player.
    pub async fn code(&self, player_id: &PlayerId) -> Option<String> {
        let workers = self.workers.read().await;
        workers.get(player_id).and_then(|handle| handle.code())
    }

    /// Reset every worker's stored log.
    pub async fn clear_logs(&self) {
        let workers = self.workers.read().await;
        for handle in workers.values() {
            handle.clear_log();
        }
    }

    /// Handle for one player, if present.
    pub async fn get(&self, player_id: &PlayerId) -> Option<Arc<WorkerHandle>> {
        self.workers.read().await.get(player_id).cloned()
    }

    /// Ids of every worker in the pool.
    pub async fn ids(&self) -> BTreeSet<PlayerId> {
        self.workers.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, player_id: &PlayerId) -> bool {
        self.workers.read().await.contains_key(player_id)
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    async fn provision_one(&self, player_id: PlayerId) -> Option<Arc<WorkerHandle>> {
        match self.provisioner.provision(&player_id).await {
            Ok(endpoint) => Some(Arc::new(WorkerHandle::new(player_id, &endpoint))),
            Err(e) => {
                error!(player_id = %player_id, error = %e, "Failed to provision worker");
                None
            }
        }
    }

    async fn remove_one(&self, player_id: PlayerId) {
        if let Err(e) = self.provisioner.discard(&player_id).await {
            warn!(player_id = %player_id, error = %e, "Failed to discard worker");
        }
        self.workers.write().await.remove(&player_id);
        info!(player_id = %player_id, "Worker removed");
    }
}
