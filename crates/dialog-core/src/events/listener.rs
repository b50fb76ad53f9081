//! Application callback interface
//!
//! Callbacks run on the stack's event task. They must not block; anything
//! that needs to await (sending a response, starting a transaction) should
//! be spawned onto the runtime with a clone of the [`SipStack`](crate::manager::SipStack).

use super::dialog_events::{
    DialogErrorEvent, DialogTerminatedEvent, RequestEvent, ResponseEvent, TimeoutEvent,
    TransactionTerminatedEvent, TransportErrorEvent,
};

pub trait SipListener: Send + Sync + 'static {
    fn on_request_event(&self, event: RequestEvent);

    fn on_response_event(&self, event: ResponseEvent);

    fn on_timeout_event(&self, event: TimeoutEvent);

    fn on_dialog_error_event(&self, event: DialogErrorEvent);

    fn on_transaction_terminated(&self, _event: TransactionTerminatedEvent) {}

    fn on_dialog_terminated(&self, _event: DialogTerminatedEvent) {}

    fn on_transport_error(&self, _event: TransportErrorEvent) {}
}
