//! # Client transactions (RFC 3261 §17.1)
//!
//! [`ClientTransaction`] is a cheap, cloneable handle. The state machine itself
//! runs on a spawned task; the handle only enqueues commands and reads the
//! shared [`TransactionData`].

mod invite;
mod non_invite;

pub use invite::ClientInviteLogic;
pub use non_invite::ClientNonInviteLogic;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use sipflow_sip_core::prelude::*;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transaction::data::{TransactionContext, TransactionData};
use crate::transaction::error::{Error, Result};
use crate::transaction::runner::run_transaction_loop;
use crate::transaction::utils::request_builders;
use crate::transaction::{
    InternalTransactionCommand, TransactionKey, TransactionKind, TransactionState,
};

pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Handle to a client transaction
#[derive(Debug, Clone)]
pub struct ClientTransaction {
    data: Arc<TransactionData>,
}

impl ClientTransaction {
    /// Creates the transaction in Unstarted and spawns its runner.
    ///
    /// The request must carry a topmost Via with a branch.
    pub fn new(request: Request, remote_addr: SocketAddr, context: TransactionContext) -> Result<Self> {
        let key = TransactionKey::from_request(&request, false)
            .ok_or_else(|| Error::Protocol("Request has no Via branch".to_string()))?;
        let kind = TransactionKind::for_method(&request.method, false);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let data = Arc::new(TransactionData::new(
            key,
            kind,
            TransactionState::Unstarted,
            request,
            remote_addr,
            context,
            cmd_tx,
        ));

        let runner_data = data.clone();
        match kind {
            TransactionKind::InviteClient => {
                tokio::spawn(run_transaction_loop(runner_data, Arc::new(ClientInviteLogic), cmd_rx));
            }
            _ => {
                tokio::spawn(run_transaction_loop(runner_data, Arc::new(ClientNonInviteLogic), cmd_rx));
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

    /// The request this transaction sends, re-parsed if it was evicted
    pub fn original_request(&self) -> Result<Request> {
        self.data.original_request()
    }

    pub fn last_response(&self) -> Option<Response> {
        self.data.last_response()
    }

    /// ACK sent automatically for a non-2xx final response
    pub fn last_ack(&self) -> Option<Request> {
        self.data.last_ack.lock().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    /// Sends the request and starts the machine.
    ///
    /// INVITE enters Calling, ACK goes straight to Terminated, anything else
    /// enters Trying. An I/O failure terminates the transaction.
    pub async fn send_request(&self) -> Result<()> {
        let request = self.data.original_request()?;
        request.check_mandatory_headers()?;
        if self.data.sent.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadySent);
        }

        let initial = match request.method {
            Method::Invite => TransactionState::Calling,
            Method::Ack => TransactionState::Terminated,
            _ => TransactionState::Trying,
        };
        if initial != TransactionState::Terminated {
            self.command(InternalTransactionCommand::TransitionTo(initial)).await?;
        }

        debug!(id = %self.data.key, method = %request.method, "Sending request");
        let bytes = self.data.request.lock().bytes();
        if let Err(e) = self.data.send_bytes(bytes).await {
            let _ = self
                .data
                .cmd_tx
                .send(InternalTransactionCommand::TransportError(e.to_string()))
                .await;
            return Err(e);
        }

        if initial == TransactionState::Terminated {
            self.command(InternalTransactionCommand::TransitionTo(initial)).await?;
        }
        Ok(())
    }

    /// Feeds a response matched to this transaction into the machine
    pub async fn process_response(&self, response: Response) -> Result<()> {
        self.command(InternalTransactionCommand::ProcessMessage(Message::Response(response)))
            .await
    }

    /// ACK for the 2xx this INVITE received
    pub fn create_ack(&self) -> Result<Request> {
        self.require_invite("create_ack")?;
        let response = self
            .last_response()
            .filter(|r| r.status().is_success())
            .ok_or_else(|| Error::Protocol("No 2xx response received yet".to_string()))?;
        request_builders::create_ack_for_2xx(&self.data.original_request()?, &response)
    }

    /// CANCEL for this INVITE; a provisional response must have arrived
    pub fn create_cancel(&self) -> Result<Request> {
        self.require_invite("create_cancel")?;
        match self.last_response() {
            Some(r) if r.status().is_provisional() => {}
            Some(_) => {
                return Err(Error::invalid_state(self.state(), "create_cancel after a final response"))
            }
            None => return Err(Error::Protocol("No provisional response received yet".to_string())),
        }
        request_builders::create_cancel(&self.data.original_request()?)
    }

    /// ACK for the 3xx-6xx this INVITE received
    pub fn create_error_ack(&self) -> Result<Request> {
        self.require_invite("create_error_ack")?;
        let response = self
            .last_response()
            .filter(|r| r.status().as_u16() >= 300)
            .ok_or_else(|| Error::Protocol("No error response received yet".to_string()))?;
        request_builders::create_error_ack(&self.data.original_request()?, &response)
    }

    /// Forces the transaction to Terminated
    pub async fn terminate(&self) {
        let _ = self.data.cmd_tx.send(InternalTransactionCommand::Terminate).await;
    }

    fn require_invite(&self, operation: &str) -> Result<()> {
        if self.data.kind == TransactionKind::InviteClient {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{} is only valid on INVITE transactions, not {}",
                operation, self.data.method
            )))
        }
    }

    async fn command(&self, command: InternalTransactionCommand) -> Result<()> {
        self.data.cmd_tx.send(command).await.map_err(|_| {
            Error::Concurrency(format!("transaction {} is no longer running", self.data.key))
        })
    }

    pub(crate) fn data(&self) -> &Arc<TransactionData> {
        &self.data
    }
}
