use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable handle of a dialog.
///
/// The RFC 3261 identity (Call-ID and tags) is not known until a response
/// carries the remote tag, and forks share the local half of it, so the
/// registry addresses dialogs by this handle and indexes the tag triple
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogId(pub Uuid);

impl DialogId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DialogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
