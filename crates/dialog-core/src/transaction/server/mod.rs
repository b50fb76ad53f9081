//! # Server transactions (RFC 3261 §17.2)
//!
//! Created by the stack for every inbound request except ACK. Responses from
//! the transaction user go through the runner ([`ServerTransaction::send_response`])
//! so that they are ordered with retransmitted requests and timers.

mod invite;
mod non_invite;

pub use invite::ServerInviteLogic;
pub use non_invite::ServerNonInviteLogic;

use std::net::SocketAddr;
use std::sync::Arc;

use sipflow_sip_core::prelude::*;
use tokio::sync::{mpsc, oneshot, MutexGuard};

use crate::transaction::client::COMMAND_CHANNEL_CAPACITY;
use crate::transaction::data::{TransactionContext, TransactionData};
use crate::transaction::error::{Error, Result};
use crate::transaction::runner::run_transaction_loop;
use crate::transaction::{
    InternalTransactionCommand, TransactionKey, TransactionKind, TransactionState,
};

/// Handle to a server transaction
#[derive(Debug, Clone)]
pub struct ServerTransaction {
    data: Arc<TransactionData>,
}

impl ServerTransaction {
    /// Creates the transaction for a received request and spawns its runner.
    /// Responses are sent to `remote_addr`, the source of the request.
    pub fn new(request: Request, remote_addr: SocketAddr, context: TransactionContext) -> Result<Self> {
        if request.method == Method::Ack {
            return Err(Error::Protocol("ACK does not create a server transaction".to_string()));
        }
        let key = TransactionKey::from_request(&request, true)
            .ok_or_else(|| Error::Protocol("Request has no Via header".to_string()))?;
        let kind = TransactionKind::for_method(&request.method, true);
        let initial = if kind == TransactionKind::InviteServer {
            TransactionState::Proceeding
        } else {
            TransactionState::Trying
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let data = Arc::new(TransactionData::new(
            key, kind, initial, request, remote_addr, context, cmd_tx,
        ));

        let runner_data = data.clone();
        match kind {
            TransactionKind::InviteServer => {
                tokio::spawn(run_transaction_loop(runner_data, Arc::new(ServerInviteLogic), cmd_rx));
            }
            _ => {
                tokio::spawn(run_transaction_loop(runner_data, Arc::new(ServerNonInviteLogic), cmd_rx));
            }
        }
        Ok(Self { data })
    }

    pub fn key(&self) -> &TransactionKey {
        &self.data.key
    }

    pub fn kind(&self) -> TransactionKind {
        self.data.kind
    }

    pub fn state(&self) -> TransactionState {
        self.data.state.get()
    }

    pub fn method(&self) -> &Method {
        &self.data.method
    }

    pub fn cseq(&self) -> u32 {
        self.data.cseq
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.data.remote_addr
    }

    pub fn original_request(&self) -> Result<Request> {
        self.data.original_request()
    }

    /// Last response sent, including an automatic 100 Trying
    pub fn last_response(&self) -> Option<Response> {
        self.data.last_response()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    /// Sends a response and applies the resulting transition.
    ///
    /// Fails with `InvalidState` once a final response has been sent and with
    /// `Transport` (terminating the transaction) on I/O failure.
    pub async fn send_response(&self, response: Response) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.command(InternalTransactionCommand::SendResponse { response, reply })
            .await?;
        outcome.await.map_err(|_| {
            Error::Concurrency(format!("transaction {} stopped before responding", self.data.key))
        })?
    }

    /// Sends a 1xx reliably (RFC 3262): adds `Require: 100rel` and a fresh
    /// RSeq, then retransmits it until [`acknowledge_prack`](Self::acknowledge_prack)
    /// matches or 64*T1 elapses. Returns the RSeq.
    pub async fn send_reliable_provisional(&self, mut response: Response) -> Result<u32> {
        if self.data.kind != TransactionKind::InviteServer {
            return Err(Error::Protocol(
                "Reliable provisional responses are only sent for INVITE".to_string(),
            ));
        }
        let code = response.status_code();
        if !(101..200).contains(&code) {
            return Err(Error::Protocol(format!(
                "{} cannot be sent as a reliable provisional response",
                code
            )));
        }
        if self.has_pending_reliable() {
            return Err(Error::invalid_state(
                self.state(),
                "reliable provisional while a previous one is unacknowledged",
            ));
        }

        let rseq = self.data.allocate_rseq();
        if !response.requires("100rel") {
            response.push_header(TypedHeader::Require(vec!["100rel".to_string()]));
        }
        response.set_header(TypedHeader::RSeq(rseq));
        self.send_response(response).await?;
        Ok(rseq)
    }

    pub fn has_pending_reliable(&self) -> bool {
        self.data.reliable.lock().is_some()
    }

    /// True when `rack` acknowledges the pending reliable provisional response
    pub fn prack_matches(&self, rack: &RAck) -> bool {
        self.data.reliable.lock().as_ref().is_some_and(|pending| {
            pending.rseq == rack.rseq && pending.cseq == rack.cseq && rack.method == self.data.method
        })
    }

    /// Stops retransmitting the pending reliable provisional response if
    /// `rack` matches it
    pub fn acknowledge_prack(&self, rack: &RAck) -> bool {
        if !self.prack_matches(rack) {
            return false;
        }
        self.data.clear_reliable().is_some()
    }

    /// Feeds a retransmitted request or an ACK into the machine
    pub async fn process_request(&self, request: Request) -> Result<()> {
        self.command(InternalTransactionCommand::ProcessMessage(Message::Request(request)))
            .await
    }

    /// Held while the request is dispatched; a CANCEL for the same INVITE
    /// waits on it
    pub async fn lock_dispatch(&self) -> MutexGuard<'_, ()> {
        self.data.dispatch_lock.lock().await
    }

    pub async fn terminate(&self) {
        let _ = self.data.cmd_tx.send(InternalTransactionCommand::Terminate).await;
    }

    async fn command(&self, command: InternalTransactionCommand) -> Result<()> {
        self.data.cmd_tx.send(command).await.map_err(|_| {
            Error::invalid_state(TransactionState::Terminated, format!("command for {}", self.data.key))
        })
    }

    pub(crate) fn data(&self) -> &Arc<TransactionData> {
        &self.data
    }
}

/// Outcome of sending a response with the given status in `state`
pub fn server_response_transition(
    kind: TransactionKind,
    state: TransactionState,
    status: StatusCode,
) -> Result<Option<TransactionState>> {
    use TransactionState::*;

    match (kind, state) {
        (TransactionKind::InviteServer, Proceeding) => Ok(if status.is_provisional() {
            None
        } else if status.is_success() {
            Some(Terminated)
        } else {
            Some(Completed)
        }),
        (TransactionKind::NonInviteServer, Trying | Proceeding) => Ok(if status.is_provisional() {
            (state == Trying).then_some(Proceeding)
        } else {
            Some(Completed)
        }),
        _ => Err(Error::invalid_state(
            state,
            format!("send {} response", status.as_u16()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_transitions() {
        use TransactionState::*;
        let invite = TransactionKind::InviteServer;
        assert_eq!(server_response_transition(invite, Proceeding, StatusCode::Ringing).unwrap(), None);
        assert_eq!(server_response_transition(invite, Proceeding, StatusCode::Ok).unwrap(), Some(Terminated));
        assert_eq!(
            server_response_transition(invite, Proceeding, StatusCode::BusyHere).unwrap(),
            Some(Completed)
        );
        assert!(server_response_transition(invite, Completed, StatusCode::Ok).is_err());

        let other = TransactionKind::NonInviteServer;
        assert_eq!(server_response_transition(other, Trying, StatusCode::Trying).unwrap(), Some(Proceeding));
        assert_eq!(server_response_transition(other, Proceeding, StatusCode::Trying).unwrap(), None);
        assert_eq!(server_response_transition(other, Trying, StatusCode::Ok).unwrap(), Some(Completed));
        assert!(server_response_transition(other, Completed, StatusCode::Ok).is_err());
    }
}
