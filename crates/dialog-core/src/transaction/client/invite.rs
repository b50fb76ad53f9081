//! INVITE client transaction (RFC 3261 §17.1.1, Figure 5)

use std::sync::Arc;

use async_trait::async_trait;
use sipflow_sip_core::prelude::*;
use tracing::{debug, trace, warn};

use crate::transaction::data::{TimerHandles, TransactionData};
use crate::transaction::error::{Error, Result};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::utils::request_builders::create_error_ack;
use crate::transaction::{
    TransactionEvent, TransactionKind, TransactionState, TransactionTimer,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ClientInviteLogic;

impl ClientInviteLogic {
    /// Builds, sends and remembers the ACK for a 3xx-6xx response
    async fn ack_error_response(&self, data: &Arc<TransactionData>, response: &Response) -> Result<()> {
        let original = data.original_request()?;
        let ack = create_error_ack(&original, response)?;
        debug!(id = %data.key, status = response.status_code(), "Sending ACK for error response");
        data.send_bytes(ack.to_bytes()).await?;
        *data.last_ack.lock() = Some(ack);
        Ok(())
    }

    async fn resend_error_ack(&self, data: &Arc<TransactionData>) -> Result<()> {
        let ack = data.last_ack.lock().clone();
        if let Some(ack) = ack {
            trace!(id = %data.key, "Final response retransmitted, resending ACK");
            data.send_bytes(ack.to_bytes()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLogic for ClientInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
    }

    async fn on_enter_state(
        &self,
        data: &Arc<TransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<()> {
        match new_state {
            TransactionState::Calling => {
                if !data.is_reliable() {
                    timers.interval = data.settings.timer_a();
                    timers.start(data, TransactionTimer::A, timers.interval);
                }
                timers.start(data, TransactionTimer::B, data.settings.timer_b());
            }
            TransactionState::Proceeding => {
                timers.cancel(data, TransactionTimer::A);
                timers.cancel(data, TransactionTimer::B);
            }
            TransactionState::Completed => {
                timers.cancel(data, TransactionTimer::A);
                timers.cancel(data, TransactionTimer::B);
                timers.start(data, TransactionTimer::D, data.settings.timer_d(data.is_reliable()));
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
        let response = match message {
            Message::Response(response) => response,
            Message::Request(request) => {
                return Err(Error::Protocol(format!(
                    "Client transaction received a {} request",
                    request.method
                )))
            }
        };
        let status = response.status();
        let transaction_id = data.key.clone();

        match current_state {
            TransactionState::Calling | TransactionState::Proceeding => {
                if status.is_provisional() {
                    data.record_response(&response);
                    data.emit(TransactionEvent::ProvisionalResponse {
                        transaction_id,
                        response,
                    })
                    .await;
                    Ok((current_state == TransactionState::Calling)
                        .then_some(TransactionState::Proceeding))
                } else if status.is_success() {
                    // The ACK for a 2xx belongs to the dialog, not to the transaction
                    data.record_response(&response);
                    data.emit(TransactionEvent::SuccessResponse {
                        transaction_id,
                        response,
                    })
                    .await;
                    Ok(Some(TransactionState::Terminated))
                } else {
                    data.record_response(&response);
                    if let Err(e) = self.ack_error_response(data, &response).await {
                        warn!(id = %data.key, error = %e, "Could not ACK error response");
                    }
                    data.emit(TransactionEvent::FailureResponse {
                        transaction_id,
                        response,
                    })
                    .await;
                    if data.is_reliable() {
                        Ok(Some(TransactionState::Terminated))
                    } else {
                        Ok(Some(TransactionState::Completed))
                    }
                }
            }
            TransactionState::Completed => {
                if status.as_u16() >= 300 {
                    self.resend_error_ack(data).await?;
                }
                Ok(None)
            }
            _ => {
                trace!(id = %data.key, state = ?current_state, "Ignoring response");
                Ok(None)
            }
        }
    }

    async fn handle_timer(
        &self,
        data: &Arc<TransactionData>,
        timer: TransactionTimer,
        current_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        match (timer, current_state) {
            (TransactionTimer::A, TransactionState::Calling) => {
                data.retransmit_request().await?;
                // Timer A doubles without the T2 cap (RFC 3261 §17.1.1.2)
                timers.interval *= 2;
                timers.start(data, TransactionTimer::A, timers.interval);
                Ok(None)
            }
            (TransactionTimer::B, TransactionState::Calling) => {
                debug!(id = %data.key, "Timer B fired, INVITE timed out");
                data.emit(TransactionEvent::TransactionTimeout {
                    transaction_id: data.key.clone(),
                })
                .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TransactionTimer::D, TransactionState::Completed) => Ok(Some(TransactionState::Terminated)),
            _ => {
                trace!(id = %data.key, %timer, state = ?current_state, "Stale timer ignored");
                Ok(None)
            }
        }
    }
}
