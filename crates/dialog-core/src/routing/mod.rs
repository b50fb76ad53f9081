//! # Dialog filter
//!
//! Every inbound request passes through here before the listener sees it.
//! [`rules`] holds the per-method decision table, [`filter`] the
//! preprocessing (own-Route stripping, automatic rejections). The stack
//! gathers the facts and acts on the verdict.
//!
//! | Method | Checks, in order |
//! |---|---|
//! | ACK | dialog match, pending-ACK table, else drop |
//! | PRACK | dialog and RAck match, else 481 or drop |
//! | CANCEL | matching INVITE server transaction, auto 200 if answered |
//! | INVITE | pending lower CSeq (500), glare (491), CSeq order |
//! | NOTIFY | dialog, pending SUBSCRIBE, unsolicited policy |
//! | others | CSeq order, 481 when the dialog is missing |

pub mod filter;
pub mod rules;

pub use filter::{ensure_branch, rejection_response, strip_own_route};
pub use rules::{AckContext, FilterVerdict, ReInviteFacts, Rejection};
