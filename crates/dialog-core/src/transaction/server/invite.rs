//! INVITE server transaction (RFC 3261 §17.2.1, Figure 7) with RFC 3262
//! reliable provisional retransmission

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sipflow_sip_core::prelude::*;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::transaction::data::{PendingReliable, TimerHandles, TransactionData};
use crate::transaction::error::{Error, Result};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::server::server_response_transition;
use crate::transaction::utils::request_builders::create_trying;
use crate::transaction::{
    TransactionEvent, TransactionKind, TransactionState, TransactionTimer,
};

/// Delay before an automatic 100 Trying (RFC 3261 §17.2.1)
const TRYING_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Default, Clone, Copy)]
pub struct ServerInviteLogic;

impl ServerInviteLogic {
    async fn retransmit_reliable(&self, data: &Arc<TransactionData>) -> Result<()> {
        let pending = data.reliable.lock().clone();
        let Some(pending) = pending else {
            return Ok(());
        };
        if Instant::now() >= pending.deadline {
            data.clear_reliable();
            debug!(id = %data.key, rseq = pending.rseq, "Reliable provisional response was never PRACKed");
            data.emit(TransactionEvent::ReliableProvisionalTimeout {
                transaction_id: data.key.clone(),
                rseq: pending.rseq,
            })
            .await;
            return Ok(());
        }

        trace!(id = %data.key, rseq = pending.rseq, "Retransmitting reliable provisional response");
        data.send_bytes(pending.bytes.clone()).await?;
        let interval = pending.interval * 2;
        let mut slot = data.reliable.lock();
        // A PRACK may have cleared the slot while we were sending
        if let Some(current) = slot.as_mut().filter(|p| p.rseq == pending.rseq) {
            current.interval = interval;
            current.timer = Some(data.schedule_command(TransactionTimer::ReliableProvisional, interval));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLogic for ServerInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
    }

    async fn on_enter_state(
        &self,
        data: &Arc<TransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<()> {
        match new_state {
            TransactionState::Proceeding => {
                timers.start(data, TransactionTimer::Trying100, TRYING_DELAY);
            }
            TransactionState::Completed => {
                timers.cancel(data, TransactionTimer::Trying100);
                if !data.is_reliable() {
                    timers.interval = data.settings.timer_g();
                    timers.start(data, TransactionTimer::G, timers.interval);
                }
                timers.start(data, TransactionTimer::H, data.settings.timer_h());
            }
            TransactionState::Confirmed => {
                timers.cancel(data, TransactionTimer::G);
                timers.cancel(data, TransactionTimer::H);
                timers.start(data, TransactionTimer::I, data.settings.timer_i(data.is_reliable()));
            }
            _ => {}
        }
        Ok(())
    }

    async fn process_message(
        &self,
        data: &Arc<TransactionData>,
        message: Message,
        current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        let request = match message {
            Message::Request(request) => request,
            Message::Response(response) => {
                return Err(Error::Protocol(format!(
                    "Server transaction received a {} response",
                    response.status_code()
                )))
            }
        };

        match (&request.method, current_state) {
            (Method::Invite, TransactionState::Proceeding | TransactionState::Completed) => {
                data.retransmit_response().await?;
                if data.raise_retransmit_events {
                    data.emit(TransactionEvent::Retransmission {
                        transaction_id: data.key.clone(),
                    })
                    .await;
                }
                Ok(None)
            }
            (Method::Ack, TransactionState::Completed) => {
                debug!(id = %data.key, "ACK received for final response");
                data.emit(TransactionEvent::AckReceived {
                    transaction_id: data.key.clone(),
                    request,
                })
                .await;
                Ok(Some(TransactionState::Confirmed))
            }
            _ => {
                trace!(id = %data.key, method = %request.method, state = ?current_state, "Absorbing request");
                Ok(None)
            }
        }
    }

    async fn send_response(
        &self,
        data: &Arc<TransactionData>,
        response: Response,
        current_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        let status = response.status();
        let next = server_response_transition(TransactionKind::InviteServer, current_state, status)?;
        timers.cancel(data, TransactionTimer::Trying100);

        if status.is_provisional() {
            if let Some(rseq) = response.rseq().filter(|_| response.requires("100rel")) {
                let interval = data.settings.t1;
                // Reliable transports do not retransmit; the timer only bounds the PRACK wait
                let first_fire = if data.is_reliable() {
                    data.settings.timer_b()
                } else {
                    interval
                };
                // Armed before sending so that a fast PRACK finds it
                *data.reliable.lock() = Some(PendingReliable {
                    rseq,
                    cseq: data.cseq,
                    bytes: response.to_bytes(),
                    interval,
                    deadline: Instant::now() + data.settings.timer_b(),
                    timer: Some(data.schedule_command(TransactionTimer::ReliableProvisional, first_fire)),
                });
            }
        } else {
            data.clear_reliable();
        }

        if let Err(e) = data.transmit_response(response).await {
            data.clear_reliable();
            return Err(e);
        }
        Ok(next)
    }

    async fn handle_timer(
        &self,
        data: &Arc<TransactionData>,
        timer: TransactionTimer,
        current_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        match (timer, current_state) {
            (TransactionTimer::Trying100, TransactionState::Proceeding) => {
                if data.last_response().is_none() {
                    let trying = create_trying(&data.original_request()?);
                    debug!(id = %data.key, "Sending automatic 100 Trying");
                    data.transmit_response(trying).await?;
                }
                Ok(None)
            }
            (TransactionTimer::ReliableProvisional, TransactionState::Proceeding) => {
                self.retransmit_reliable(data).await?;
                Ok(None)
            }
            (TransactionTimer::G, TransactionState::Completed) => {
                data.retransmit_response().await?;
                timers.interval = data.settings.backoff(timers.interval);
                timers.start(data, TransactionTimer::G, timers.interval);
                Ok(None)
            }
            (TransactionTimer::H, TransactionState::Completed) => {
                debug!(id = %data.key, "Timer H fired, no ACK received");
                data.emit(TransactionEvent::AckTimeout {
                    transaction_id: data.key.clone(),
                })
                .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TransactionTimer::I, TransactionState::Confirmed) => Ok(Some(TransactionState::Terminated)),
            _ => {
                trace!(id = %data.key, %timer, state = ?current_state, "Stale timer ignored");
                Ok(None)
            }
        }
    }
}
