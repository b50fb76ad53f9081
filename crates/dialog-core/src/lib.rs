//! # sipflow-dialog-core
//!
//! RFC 3261 transaction and dialog layers for a SIP user agent.
//!
//! The crate sits between a [`Transport`](sipflow_sip_transport::Transport)
//! and an application implementing [`SipListener`]:
//!
//! ```text
//!  application ── SipListener callbacks ◀──┐
//!       │                                  │
//!       ▼                                  │
//!   SipStack ──▶ dialogs ──▶ transactions ─┤
//!       ▲                         │        │
//!       └── dialog filter ◀── transport ◀──┘
//! ```
//!
//! - [`transaction`]: client and server state machines, one task each
//! - [`dialog`]: dialog state, CSeq bookkeeping, 2xx retransmission, ACK gate
//! - [`routing`]: the inbound filter's decision table
//! - [`registry`]: transaction, dialog, merge and pending-ACK tables
//! - [`manager`]: the [`SipStack`] facade
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sipflow_dialog_core::prelude::*;
//! use sipflow_sip_transport::bind_udp;
//!
//! struct Quiet;
//!
//! impl SipListener for Quiet {
//!     fn on_request_event(&self, _event: RequestEvent) {}
//!     fn on_response_event(&self, _event: ResponseEvent) {}
//!     fn on_timeout_event(&self, _event: TimeoutEvent) {}
//!     fn on_dialog_error_event(&self, _event: DialogErrorEvent) {}
//! }
//!
//! # tokio_test::block_on(async {
//! let (transport, events) = bind_udp("127.0.0.1:5060".parse().unwrap()).await.unwrap();
//! let stack = SipStack::new(StackConfig::default(), Arc::new(transport), Arc::new(Quiet)).unwrap();
//! stack.start(events).unwrap();
//! # })
//! ```

pub mod config;
pub mod dialog;
pub mod errors;
pub mod events;
pub mod logging;
pub mod manager;
pub mod registry;
pub mod routing;
pub mod timer;
pub mod transaction;

pub use config::StackConfig;
pub use dialog::{Dialog, DialogId, DialogState, SharedDialog};
pub use errors::{DialogError, DialogResult};
pub use events::SipListener;
pub use manager::SipStack;

pub mod prelude {
    pub use crate::config::StackConfig;
    pub use crate::dialog::{Dialog, DialogId, DialogState, SharedDialog};
    pub use crate::errors::{DialogError, DialogResult};
    pub use crate::events::{
        DialogErrorEvent, DialogErrorKind, DialogTerminatedEvent, RequestEvent, ResponseEvent, SipListener,
        Timeout, TimeoutEvent, TransactionTerminatedEvent, TransportErrorEvent,
    };
    pub use crate::logging::{setup_logging, LoggingConfig};
    pub use crate::manager::SipStack;
    pub use crate::timer::TimerSettings;
    pub use crate::transaction::{
        ClientTransaction, ServerTransaction, TransactionKey, TransactionKind, TransactionState,
    };
}
