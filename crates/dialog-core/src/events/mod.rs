//! Application-facing events and the listener they are delivered to

pub mod dialog_events;
pub mod listener;

pub use dialog_events::{
    DialogErrorEvent, DialogErrorKind, DialogTerminatedEvent, RequestEvent, ResponseEvent, Timeout,
    TimeoutEvent, TransactionTerminatedEvent, TransportErrorEvent,
};
pub use listener::SipListener;
