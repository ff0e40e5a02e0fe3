//! Worker endpoint provisioning.
//!
//! The pool does not know how workers are run. A provisioner is handed a
//! player id when the player joins and returns the base URL of a worker
//! serving that player; it is told again when the player leaves.

use anyhow::Result;
use arena_id::PlayerId;
use async_trait::async_trait;
use tracing::debug;

/// Placeholder substituted with the player id in endpoint templates.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Factory for worker endpoints.
#[async_trait]
pub trait WorkerProvisioner: Send + Sync {
    /// Start or locate a worker for `player_id`, returning its base URL.
    async fn provision(&self, player_id: &PlayerId) -> Result<String>;

    /// Release the worker for `player_id`.
    async fn discard(&self, player_id: &PlayerId) -> Result<()>;
}

/// Provisioner for workers managed elsewhere.
///
/// The endpoint is derived from a template such as
/// `http://worker-{id}.workers.svc:5000`; discarding is a no-op.
#[derive(Debug, Clone)]
pub struct TemplateProvisioner {
    template: String,
}

impl TemplateProvisioner {
    /// Create a provisioner from a URL template containing `{id}`.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(ID_PLACEHOLDER) {
            anyhow::bail!("worker endpoint template {template:?} has no {ID_PLACEHOLDER} placeholder");
        }
        Ok(Self { template })
    }

    /// Endpoint for a player.
    pub fn endpoint(&self, player_id: &PlayerId) -> String {
        self.template.replace(ID_PLACEHOLDER, player_id.as_str())
    }
}

#[async_trait]
impl WorkerProvisioner for TemplateProvisioner {
    async fn provision(&self, player_id: &PlayerId) -> Result<String> {
        let endpoint = self.endpoint(player_id);
        debug!(player_id = %player_id, endpoint = %endpoint, "Resolved worker endpoint");
        Ok(endpoint)
    }

    async fn discard(&self, player_id: &PlayerId) -> Result<()> {
        debug!(player_id = %player_id, "Worker is externally managed, nothing to discard");
        Ok(())
    }
}
