//! Worker pool for per-player decision endpoints.
//!
//! Every player in a running game is backed by a remote worker that is
//! asked, once per game tick, what its avatar should do. This crate owns
//! the game side of that conversation:
//!
//! - `protocol`: the `/turn/` request/response exchange
//! - `handle`: one worker's last known answer, reset to safe defaults on
//!   any failure
//! - `pool`: the id → handle map and its bounded add/remove/fetch batches
//! - `provisioner`: the factory that finds or starts a worker endpoint
//!
//! The pool is driven by the simulation loop. It calls `add`/`remove` as
//! players join and leave, and `fetch_all` every tick. Sequencing between
//! those phases is the caller's job.

pub mod error;
pub mod handle;
pub mod pool;
pub mod protocol;
pub mod provisioner;

pub use error::WorkerError;
pub use handle::{WorkerHandle, WorkerState};
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use protocol::TurnResponse;
pub use provisioner::{TemplateProvisioner, WorkerProvisioner};
