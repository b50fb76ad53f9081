use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use sipflow_sip_core::prelude::*;
use sipflow_sip_transport::Transport;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::timer::{TimerId, TimerService, TimerSettings};
use crate::transaction::error::{Error, Result};
use crate::transaction::request_slot::RequestSlot;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TransactionEvent, TransactionKey,
    TransactionKind, TransactionState, TransactionTimer,
};

/// A reliable provisional response waiting for its PRACK (RFC 3262)
#[derive(Debug, Clone)]
pub(crate) struct PendingReliable {
    pub rseq: u32,
    pub cseq: u32,
    pub bytes: Bytes,
    pub interval: Duration,
    pub deadline: Instant,
    pub timer: Option<TimerId>,
}

/// State shared between a transaction's runner task and its handles
#[derive(Debug)]
pub struct TransactionData {
    pub(crate) key: TransactionKey,
    pub(crate) kind: TransactionKind,
    pub(crate) state: AtomicTransactionState,
    pub(crate) request: Mutex<RequestSlot>,
    pub(crate) method: Method,
    pub(crate) cseq: u32,
    pub(crate) last_response: Mutex<Option<Response>>,
    pub(crate) last_response_bytes: Mutex<Option<Bytes>>,
    /// ACK generated for a non-2xx final response (INVITE client)
    pub(crate) last_ack: Mutex<Option<Request>>,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events_tx: mpsc::Sender<TransactionEvent>,
    pub(crate) cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    pub(crate) timers: Arc<TimerService>,
    pub(crate) settings: TimerSettings,
    pub(crate) sent: AtomicBool,
    pub(crate) raise_retransmit_events: bool,
    pub(crate) reliable: Mutex<Option<PendingReliable>>,
    pub(crate) next_rseq: AtomicU32,
    /// Serializes the dispatch of an INVITE against a CANCEL for it
    pub(crate) dispatch_lock: tokio::sync::Mutex<()>,
}

/// Collaborators a transaction is created with
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub transport: Arc<dyn Transport>,
    pub events_tx: mpsc::Sender<TransactionEvent>,
    pub timers: Arc<TimerService>,
    pub settings: TimerSettings,
    pub raise_retransmit_events: bool,
}

impl TransactionData {
    pub(crate) fn new(
        key: TransactionKey,
        kind: TransactionKind,
        initial_state: TransactionState,
        request: Request,
        remote_addr: SocketAddr,
        context: TransactionContext,
        cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    ) -> Self {
        let method = request.method.clone();
        let cseq = request.cseq().map(|c| c.seq).unwrap_or_default();
        Self {
            key,
            kind,
            state: AtomicTransactionState::new(initial_state),
            request: Mutex::new(RequestSlot::new(request)),
            method,
            cseq,
            last_response: Mutex::new(None),
            last_response_bytes: Mutex::new(None),
            last_ack: Mutex::new(None),
            remote_addr,
            transport: context.transport,
            events_tx: context.events_tx,
            cmd_tx,
            timers: context.timers,
            settings: context.settings,
            sent: AtomicBool::new(false),
            raise_retransmit_events: context.raise_retransmit_events,
            reliable: Mutex::new(None),
            // RFC 3262 §3: initial RSeq between 1 and 2**31 - 1
            next_rseq: AtomicU32::new(rand::thread_rng().gen_range(1..(1u32 << 31))),
            dispatch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub fn is_reliable(&self) -> bool {
        self.transport.is_reliable()
    }

    pub(crate) fn original_request(&self) -> Result<Request> {
        self.request.lock().request()
    }

    pub(crate) async fn emit(&self, event: TransactionEvent) {
        if self.events_tx.send(event).await.is_err() {
            trace!(id = %self.key, "Transaction user is gone, event dropped");
        }
    }

    pub(crate) async fn emit_error(&self, error: &Error) {
        self.emit(TransactionEvent::Error {
            transaction_id: Some(self.key.clone()),
            error: error.to_string(),
        })
        .await;
    }

    pub(crate) async fn send_bytes(&self, bytes: Bytes) -> Result<()> {
        self.transport
            .send_bytes(bytes, self.remote_addr)
            .await
            .map_err(|e| {
                warn!(id = %self.key, error = %e, "Send failed");
                Error::Transport(e.to_string())
            })
    }

    /// Resends the original request
    pub(crate) async fn retransmit_request(&self) -> Result<()> {
        let bytes = self.request.lock().bytes();
        trace!(id = %self.key, "Retransmitting request");
        self.send_bytes(bytes).await?;
        if self.raise_retransmit_events {
            self.emit(TransactionEvent::Retransmission {
                transaction_id: self.key.clone(),
            })
            .await;
        }
        Ok(())
    }

    /// Resends the last response sent by a server transaction, if any
    pub(crate) async fn retransmit_response(&self) -> Result<()> {
        let bytes = self.last_response_bytes.lock().clone();
        if let Some(bytes) = bytes {
            trace!(id = %self.key, "Retransmitting last response");
            self.send_bytes(bytes).await?;
        }
        Ok(())
    }

    /// Encodes, sends and records a response
    pub(crate) async fn transmit_response(&self, response: Response) -> Result<()> {
        let bytes = response.to_bytes();
        self.send_bytes(bytes.clone()).await?;
        *self.last_response_bytes.lock() = Some(bytes);
        *self.last_response.lock() = Some(response);
        Ok(())
    }

    pub(crate) fn record_response(&self, response: &Response) {
        *self.last_response.lock() = Some(response.clone());
    }

    pub(crate) fn last_response(&self) -> Option<Response> {
        self.last_response.lock().clone()
    }

    pub(crate) fn allocate_rseq(&self) -> u32 {
        self.next_rseq.fetch_add(1, Ordering::Relaxed)
    }

    /// Cancels the retransmission of a pending reliable provisional response
    pub(crate) fn clear_reliable(&self) -> Option<PendingReliable> {
        let pending = self.reliable.lock().take();
        if let Some(timer) = pending.as_ref().and_then(|p| p.timer) {
            self.timers.cancel(timer);
        }
        pending
    }

    /// Schedules `timer` to be delivered to the runner after `delay`
    pub(crate) fn schedule_command(&self, timer: TransactionTimer, delay: Duration) -> TimerId {
        let cmd_tx = self.cmd_tx.clone();
        self.timers.schedule(delay, async move {
            let _ = cmd_tx.send(InternalTransactionCommand::Timer(timer)).await;
        })
    }
}

/// Timers armed by a runner, with the current retransmission interval
#[derive(Debug, Default)]
pub struct TimerHandles {
    active: HashMap<TransactionTimer, TimerId>,
    pub(crate) interval: Duration,
}

impl TimerHandles {
    /// Arms `timer`, replacing a previous instance
    pub(crate) fn start(&mut self, data: &TransactionData, timer: TransactionTimer, delay: Duration) {
        self.cancel(data, timer);
        debug!(id = %data.key, timer = %timer, ?delay, "Starting timer");
        let id = data.schedule_command(timer, delay);
        self.active.insert(timer, id);
    }

    pub(crate) fn cancel(&mut self, data: &TransactionData, timer: TransactionTimer) {
        if let Some(id) = self.active.remove(&timer) {
            data.timers.cancel(id);
        }
    }

    /// Forgets a timer that has fired
    pub(crate) fn fired(&mut self, timer: TransactionTimer) {
        self.active.remove(&timer);
    }

    pub(crate) fn cancel_all(&mut self, data: &TransactionData) {
        for (_, id) in self.active.drain() {
            data.timers.cancel(id);
        }
    }

    pub fn is_active(&self, timer: TransactionTimer) -> bool {
        self.active.contains_key(&timer)
    }
}
