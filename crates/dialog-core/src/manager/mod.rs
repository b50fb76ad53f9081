//! Stack manager
//!
//! [`SipStack`] ties the transport, the transactions, the dialogs and the
//! application listener together. Its behaviour is split across submodules:
//!
//! - `core`: state, lifecycle and the two driver loops
//! - `transaction_integration`: creating transactions, sending requests and responses
//! - `dialog_operations`: dialog lifecycle and in-dialog requests
//! - `message_routing`: the inbound filter
//! - `event_processing`: transaction events and timer commands

pub mod core;

mod dialog_operations;
mod event_processing;
mod message_routing;
mod transaction_integration;

pub use core::{SipStack, StackCommand};
