//! Reconciliation loop primitives.
//!
//! This library provides helpers for implementing reconciliation loops
//! that converge a locally tracked set of units to an externally declared
//! desired state. Key concepts:
//!
//! - **Desired state**: What should be running (fetched fresh every pass).
//! - **Tracked set**: What this process believes is running.
//! - **Batch**: One fan-out of create/delete work, bounded in concurrency
//!   and awaited as a whole before the loop moves on.
//!
//! # Invariants
//!
//! - The tracked set is only mutated through [`StateTracker`]'s diff
//!   operations, each running under one exclusive lock
//! - No I/O happens while that lock is held
//! - Every pass re-diffs from scratch, so a failed operation is retried
//!   implicitly on the next pass

mod batch;
mod config_hash;
mod tracker;

use std::time::Duration;

pub use batch::BatchPool;
pub use config_hash::ConfigHash;
pub use tracker::{Snapshot, StateTracker};

/// Default idle delay between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of operations a batch runs at once.
pub const DEFAULT_CONCURRENCY: usize = 3;
