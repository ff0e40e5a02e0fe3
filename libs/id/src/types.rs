//! Typed ID definitions for orchestrated units.

use crate::define_id;

// =============================================================================
// Orchestrated units
// =============================================================================

define_id!(GameId, "game id");
define_id!(PlayerId, "player id");
