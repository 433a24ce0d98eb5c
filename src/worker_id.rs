use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, non-empty identifier for a worker node, unique across the cluster.
///
/// `WorkerId` deliberately carries no structure beyond "non-empty string" — the fabric never
/// interprets it, it only uses it as a registry key and as an RPC argument.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Builds a `WorkerId` from any string-like value, returning `None` for the empty string.
    ///
    /// Matches the registry's "a nil or empty `WorkerId` never mutates the registry" rule at
    /// the construction boundary rather than re-checking emptiness at every call site.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
