//! # SIP transactions (RFC 3261 §17)
//!
//! Each transaction is a small state machine driven by its own tokio task (see
//! [`runner`]). Inbound messages, timer expirations and requests from the
//! transaction user all arrive as [`InternalTransactionCommand`]s on that
//! task's queue, so the transitions of one transaction are strictly
//! sequential. The machine reports upward through [`TransactionEvent`]s.
//!
//! ```text
//!  INVITE client          non-INVITE client      INVITE server          non-INVITE server
//!  Unstarted              Unstarted              Proceeding             Trying
//!     │ send                 │ send                 │ 3xx-6xx              │ 1xx
//!  Calling ──1xx──┐       Trying ──1xx──┐       Completed ──ACK──┐     Proceeding
//!     │ 2xx    Proceeding    │ final   Proceeding   │ H        Confirmed   │ final
//!     │ 3xx-6xx   │          ▼          │           ▼            │ I       ▼
//!     ▼       ────┘      Completed ─────┘       Terminated ◀─────┘     Completed ── J ──▶ Terminated
//!  Completed ── D ──▶ Terminated
//! ```

pub mod client;
pub mod error;
pub mod logic;
pub mod request_slot;
pub mod runner;
pub mod server;
pub mod utils;

mod data;

pub use client::ClientTransaction;
pub use data::{TimerHandles, TransactionContext, TransactionData};
pub use server::ServerTransaction;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use sipflow_sip_core::BRANCH_MAGIC_COOKIE;
use sipflow_sip_core::prelude::*;
use tokio::sync::oneshot;

use crate::transaction::error::{Error, Result};

/// Identifies a transaction: topmost Via branch, method and side.
///
/// ACK and CANCEL carry the branch of the INVITE they refer to; an ACK for a
/// non-2xx final response is matched against the INVITE server transaction,
/// so server-side keys normalize ACK to INVITE. Requests without an RFC 3261
/// branch get a synthetic RFC 2543 style identifier built from Call-ID,
/// From-tag, CSeq number and the Via sent-by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        Self {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Key of a request, either one we received (`is_server`) or one we send
    pub fn from_request(request: &Request, is_server: bool) -> Option<Self> {
        let method = match (&request.method, is_server) {
            (Method::Ack, true) => Method::Invite,
            (m, _) => m.clone(),
        };
        Some(Self::new(branch_id(request)?, method, is_server))
    }

    /// Key of the client transaction a response belongs to
    pub fn from_response(response: &Response) -> Option<Self> {
        let method = response.cseq()?.method.clone();
        Some(Self::new(branch_id(response)?, method, false))
    }

    /// Same branch and side, different method (CANCEL → INVITE lookups)
    pub fn with_method(&self, method: Method) -> Self {
        Self::new(self.branch.clone(), method, self.is_server)
    }

    /// True when the branch carries the RFC 3261 magic cookie
    pub fn is_rfc3261(&self) -> bool {
        self.branch.starts_with(BRANCH_MAGIC_COOKIE)
    }
}

fn branch_id<M: HeaderAccess>(message: &M) -> Option<String> {
    let via = message.via()?;
    match via.branch() {
        Some(branch) if via.is_rfc3261_branch() => Some(branch.to_string()),
        _ => {
            let cseq = message.cseq()?;
            Some(format!(
                "rfc2543:{}:{}:{}:{}:{}",
                message.call_id()?,
                message.from_tag().unwrap_or_default(),
                cseq.seq,
                via.host,
                via.port.unwrap_or(5060)
            ))
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.branch,
            self.method,
            if self.is_server { "server" } else { "client" }
        )
    }
}

/// The four RFC 3261 transaction machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn for_method(method: &Method, is_server: bool) -> Self {
        match (method, is_server) {
            (Method::Invite, false) => TransactionKind::InviteClient,
            (_, false) => TransactionKind::NonInviteClient,
            (Method::Invite, true) => TransactionKind::InviteServer,
            (_, true) => TransactionKind::NonInviteServer,
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, TransactionKind::InviteServer | TransactionKind::NonInviteServer)
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, TransactionKind::InviteClient | TransactionKind::InviteServer)
    }
}

/// Transaction states across all four machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionState {
    /// Created, request not yet sent (client only)
    Unstarted = 0,
    /// INVITE client waiting for any response
    Calling = 1,
    /// Non-INVITE waiting for any response (client) or for the TU (server)
    Trying = 2,
    Proceeding = 3,
    Completed = 4,
    /// INVITE server received the ACK for its non-2xx response
    Confirmed = 5,
    Terminated = 6,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Unstarted,
            1 => TransactionState::Calling,
            2 => TransactionState::Trying,
            3 => TransactionState::Proceeding,
            4 => TransactionState::Completed,
            5 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }

    pub fn is_terminated(&self) -> bool {
        *self == TransactionState::Terminated
    }

    /// No final response has been sent or received yet
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TransactionState::Calling | TransactionState::Trying | TransactionState::Proceeding
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Unstarted => "Unstarted",
            TransactionState::Calling => "Calling",
            TransactionState::Trying => "Trying",
            TransactionState::Proceeding => "Proceeding",
            TransactionState::Completed => "Completed",
            TransactionState::Confirmed => "Confirmed",
            TransactionState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Lock-free state cell shared between the runner and transaction handles
#[derive(Debug)]
pub struct AtomicTransactionState(AtomicU8);

impl AtomicTransactionState {
    pub fn new(state: TransactionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> TransactionState {
        TransactionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores `state`, returning the previous one
    pub fn set(&self, state: TransactionState) -> TransactionState {
        TransactionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Checks a transition against the RFC 3261 figures for `kind`.
    /// Terminated is absorbing; any live state may move to Terminated.
    pub fn validate_transition(
        kind: TransactionKind,
        from: TransactionState,
        to: TransactionState,
    ) -> Result<()> {
        use TransactionState::*;

        if from == Terminated {
            return Err(Error::invalid_state(from, format!("transition to {:?}", to)));
        }
        if to == Terminated {
            return Ok(());
        }
        let allowed = match kind {
            TransactionKind::InviteClient => matches!(
                (from, to),
                (Unstarted, Calling) | (Calling, Proceeding) | (Calling, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::NonInviteClient => matches!(
                (from, to),
                (Unstarted, Trying) | (Trying, Proceeding) | (Trying, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::InviteServer => matches!(
                (from, to),
                (Proceeding, Completed) | (Completed, Confirmed)
            ),
            TransactionKind::NonInviteServer => matches!(
                (from, to),
                (Trying, Proceeding) | (Trying, Completed) | (Proceeding, Completed)
            ),
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::invalid_state(from, format!("transition to {:?} ({:?})", to, kind)))
        }
    }
}

/// RFC 3261 transaction timers, plus the 200ms automatic 100 Trying of INVITE servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionTimer {
    A,
    B,
    D,
    E,
    F,
    K,
    G,
    H,
    I,
    J,
    Trying100,
    /// Retransmission of a reliable provisional response (RFC 3262 §3)
    ReliableProvisional,
}

impl fmt::Display for TransactionTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionTimer::Trying100 => f.write_str("Timer 100"),
            TransactionTimer::ReliableProvisional => f.write_str("Timer 100rel"),
            other => write!(f, "Timer {:?}", other),
        }
    }
}

/// Events reported by transactions to the transaction user
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// 1xx received by a client transaction
    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// 2xx received by a client transaction
    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// 3xx-6xx received by a client transaction
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// ACK for a non-2xx final response absorbed by an INVITE server transaction
    AckReceived {
        transaction_id: TransactionKey,
        request: Request,
    },
    /// A request was retransmitted (only when retransmit events are enabled)
    Retransmission { transaction_id: TransactionKey },
    /// Timer B or F fired
    TransactionTimeout { transaction_id: TransactionKey },
    /// Timer H fired without an ACK
    AckTimeout { transaction_id: TransactionKey },
    /// A reliable provisional response was never PRACKed
    ReliableProvisionalTimeout {
        transaction_id: TransactionKey,
        rseq: u32,
    },
    TransportError {
        transaction_id: TransactionKey,
        error: String,
    },
    StateChanged {
        transaction_id: TransactionKey,
        previous_state: TransactionState,
        new_state: TransactionState,
    },
    Error {
        transaction_id: Option<TransactionKey>,
        error: String,
    },
    TransactionTerminated { transaction_id: TransactionKey },
}

/// Commands processed by a transaction's runner task
#[derive(Debug)]
pub enum InternalTransactionCommand {
    TransitionTo(TransactionState),
    ProcessMessage(Message),
    Timer(TransactionTimer),
    /// Response from the transaction user (server transactions)
    SendResponse {
        response: Response,
        reply: oneshot::Sender<Result<()>>,
    },
    TransportError(String),
    Terminate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(branch: &str, method: Method) -> Request {
        SimpleRequestBuilder::new(method, "sip:bob@example.com")
            .from("", "sip:alice@example.com", Some("ft"))
            .to("", "sip:bob@example.com", None)
            .call_id("call-1")
            .cseq(7)
            .via("10.0.0.1:5060", "UDP", Some(branch))
            .build()
            .unwrap()
    }

    #[test]
    fn test_ack_maps_to_invite_server_key() {
        let invite = TransactionKey::from_request(&request("z9hG4bKa", Method::Invite), true).unwrap();
        let ack = TransactionKey::from_request(&request("z9hG4bKa", Method::Ack), true).unwrap();
        assert_eq!(invite, ack);
        let client_ack = TransactionKey::from_request(&request("z9hG4bKa", Method::Ack), false).unwrap();
        assert_eq!(client_ack.method, Method::Ack);
        assert!(invite.is_rfc3261());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransactionState::Proceeding.to_string(), "Proceeding");
        assert_eq!(
            format!("{} -> {}", TransactionState::Completed, TransactionState::Terminated),
            "Completed -> Terminated"
        );
    }

    #[test]
    fn test_legacy_key_is_stable() {
        let a = TransactionKey::from_request(&request("old-style", Method::Options), true).unwrap();
        let b = TransactionKey::from_request(&request("old-style", Method::Options), true).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_rfc3261());
        assert!(a.branch.starts_with("rfc2543:call-1:ft:7"));
    }

    #[test]
    fn test_transition_table() {
        use TransactionState::*;
        let kind = TransactionKind::InviteClient;
        assert!(AtomicTransactionState::validate_transition(kind, Unstarted, Calling).is_ok());
        assert!(AtomicTransactionState::validate_transition(kind, Proceeding, Calling).is_err());
        assert!(AtomicTransactionState::validate_transition(kind, Terminated, Completed).is_err());
        assert!(AtomicTransactionState::validate_transition(
            TransactionKind::InviteServer,
            Completed,
            Confirmed
        )
        .is_ok());
        assert!(AtomicTransactionState::validate_transition(
            TransactionKind::NonInviteServer,
            Completed,
            Confirmed
        )
        .is_err());
    }
}
