//! # arena-id
//!
//! Typed identifiers for the units the arena fleet orchestrates.
//!
//! ## Design Principles
//!
//! - IDs are opaque: they are assigned by whoever owns the desired state
//!   (the web front end) and this crate never interprets their content
//! - The only structural rule is that an ID is never empty
//! - IDs are typed so a game and a player can never be mixed up
//!
//! Examples:
//! - `GameId` `"1"`, `"ranked-42"`
//! - `PlayerId` `"7"`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
