use std::fmt;

use serde::{Deserialize, Serialize};

/// RFC 3261 §12 dialog states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DialogState {
    /// Created for an outgoing or incoming request, no tagged response yet
    Null,
    /// A provisional response with a To-tag was sent or received
    Early,
    /// A 2xx was sent or received
    Confirmed,
    Terminated,
}

impl DialogState {
    pub fn is_terminated(&self) -> bool {
        *self == DialogState::Terminated
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogState::Null => write!(f, "Null"),
            DialogState::Early => write!(f, "Early"),
            DialogState::Confirmed => write!(f, "Confirmed"),
            DialogState::Terminated => write!(f, "Terminated"),
        }
    }
}
