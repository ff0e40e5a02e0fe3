//! arena game creator library
//!
//! The game creator keeps the set of running game instances in line with
//! the set the web front end says should exist. It polls the desired
//! state, diffs it against what it has already started, and drives a
//! pluggable backend to create and delete games.
//!
//! ## Modules
//!
//! - `controller`: the reconciliation loop
//! - `client`: desired state document client
//! - `backend`: backend trait and mock
//! - `process`: local child-process backend
//! - `config`: environment configuration

pub mod backend;
pub mod client;
pub mod config;
pub mod controller;
pub mod process;

// Re-export commonly used types
pub use backend::{Backend, EntityConfig, MockBackend};
pub use client::{DesiredState, DesiredStateClient, FetchError};
pub use controller::{ReconcileStats, ReconcilerConfig, ReconciliationController};
pub use process::{PortAllocator, ProcessBackend};
