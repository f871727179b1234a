use serde::{Deserialize, Serialize};
use std::fmt;

/// How stale a property owner is.
///
/// Levels are ordered: `Valid < InvalidOutput < InvalidResources`. Invalidating
/// an owner always keeps the maximum of its current level and the requested one,
/// so a pending resource rebuild is never downgraded by a later output request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum InvalidationLevel {
    #[default]
    Valid,
    InvalidOutput,
    InvalidResources,
}

impl InvalidationLevel {
    pub fn is_valid(self) -> bool {
        self == InvalidationLevel::Valid
    }

    /// The level an owner ends up at after being invalidated with `other`.
    pub fn raise(self, other: InvalidationLevel) -> InvalidationLevel {
        self.max(other)
    }
}

impl fmt::Display for InvalidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationLevel::Valid => write!(f, "Valid"),
            InvalidationLevel::InvalidOutput => write!(f, "Invalid output"),
            InvalidationLevel::InvalidResources => write!(f, "Invalid resources"),
        }
    }
}
