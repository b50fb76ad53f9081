//! # Dialogs (RFC 3261 §12)
//!
//! ```text
//! Null ──1xx+tag──▶ Early ──2xx──▶ Confirmed ──BYE──▶ Terminated
//!   │                 │                                  ▲
//!   └──────2xx────────┼──────────────────────────────────┤
//!                     └──────3xx-6xx / timeout───────────┘
//! ```
//!
//! - [`Dialog`]: the synchronous state machine
//! - [`AckGate`]: single permit serializing INVITE/ACK exchanges
//! - [`ReInviteSender`]: queue that defers re-INVITEs behind the gate

pub mod ack_gate;
pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_state;
pub mod reinvite;

pub use ack_gate::AckGate;
pub use dialog_id::DialogId;
pub use dialog_impl::{AckOutcome, Dialog, DialogSettings, DialogTimers, RetransmitTick, SeqCheck};
pub use dialog_state::DialogState;
pub use reinvite::{ReInviteDispatch, ReInviteSender};

use std::sync::Arc;

use parking_lot::Mutex;

/// A dialog as stored in the registry; all mutation happens under its lock
pub type SharedDialog = Arc<Mutex<Dialog>>;
