//! Prefixed ID generation for log-facing entities.
//!
//! IDs are `prefix_<uuid7>` — time-ordered, so two IDs minted in the same
//! process sort the same way their creation times did.

use uuid::Uuid;

fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{prefix}_{}", id.as_simple())
}

/// Generate an event ID: `evt_<uuid7>`.
pub fn event_id() -> String {
    prefixed_id("evt")
}
