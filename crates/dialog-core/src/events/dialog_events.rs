//! Events delivered to the application listener

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use sipflow_sip_core::{Request, Response};

use crate::dialog::DialogId;
use crate::transaction::{ClientTransaction, ServerTransaction, TransactionKey};

/// An inbound request that passed the dialog filter
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request: Request,
    pub source: SocketAddr,
    /// None for ACKs of 2xx, which have no server transaction
    pub transaction: Option<ServerTransaction>,
    pub dialog: Option<DialogId>,
}

/// A response matched to a client transaction or to a dialog
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub response: Response,
    pub transaction: Option<ClientTransaction>,
    pub dialog: Option<DialogId>,
    /// The same (status, CSeq, method) was already delivered for this dialog
    pub is_retransmission: bool,
}

/// What timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeout {
    /// Timer B, F or H
    Transaction,
    /// A retransmission happened (only with retransmit events enabled)
    Retransmit,
    /// A dialog-level timer gave up
    Dialog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutEvent {
    pub timeout: Timeout,
    pub transaction: Option<TransactionKey>,
    pub dialog: Option<DialogId>,
    pub is_server: bool,
}

/// Asynchronous dialog failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogErrorKind {
    /// Our 2xx was never acknowledged
    AckNotReceived,
    /// The application never ACKed a 2xx it received
    AckNotSent,
    /// The dialog stayed early past the configured bound
    EarlyStateTimeout,
    /// A queued re-INVITE could not obtain the ACK gate in time
    ReInviteTimeout,
    /// A reliable provisional response was never PRACKed
    PrackNotReceived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogErrorEvent {
    pub dialog: DialogId,
    pub error: DialogErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogTerminatedEvent {
    pub dialog: DialogId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTerminatedEvent {
    pub transaction: TransactionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportErrorEvent {
    pub transaction: Option<TransactionKey>,
    pub error: String,
}
