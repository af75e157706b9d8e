//! Request lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one `(endpoint, cache key)` pair.
///
/// Transitions are driven exclusively by the query runtime:
/// `Idle → Loading → Success | Error`. An `Error` key becomes `Loading`
/// again only through a later explicit call — there is no automatic retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No fetch has been attempted for this key.
    #[default]
    Idle,
    /// A fetch is in flight.
    Loading,
    /// The last fetch committed a normalized result.
    Success,
    /// The last fetch failed; prior successful data, if any, is retained.
    Error,
}

impl Status {
    /// Whether a fetch is currently in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Whether the last fetch committed successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
