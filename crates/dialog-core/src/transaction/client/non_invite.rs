//! Non-INVITE client transaction (RFC 3261 §17.1.2, Figure 6)

use std::sync::Arc;

use async_trait::async_trait;
use sipflow_sip_core::prelude::*;
use tracing::{debug, trace};

use crate::transaction::data::{TimerHandles, TransactionData};
use crate::transaction::error::{Error, Result};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::{
    TransactionEvent, TransactionKind, TransactionState, TransactionTimer,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ClientNonInviteLogic;

#[async_trait]
impl TransactionLogic for ClientNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
    }

    async fn on_enter_state(
        &self,
        data: &Arc<TransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<()> {
        match new_state {
            TransactionState::Trying => {
                if !data.is_reliable() {
                    timers.interval = data.settings.timer_e();
                    timers.start(data, TransactionTimer::E, timers.interval);
                }
                timers.start(data, TransactionTimer::F, data.settings.timer_f());
            }
            TransactionState::Proceeding => {
                // Retransmit at T2 once a provisional response arrived
                if !data.is_reliable() {
                    timers.interval = data.settings.t2;
                    timers.start(data, TransactionTimer::E, timers.interval);
                }
            }
            TransactionState::Completed => {
                timers.cancel(data, TransactionTimer::E);
                timers.cancel(data, TransactionTimer::F);
                timers.start(data, TransactionTimer::K, data.settings.timer_k(data.is_reliable()));
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
            TransactionState::Trying | TransactionState::Proceeding => {
                data.record_response(&response);
                if status.is_provisional() {
                    data.emit(TransactionEvent::ProvisionalResponse {
                        transaction_id,
                        response,
                    })
                    .await;
                    return Ok((current_state == TransactionState::Trying)
                        .then_some(TransactionState::Proceeding));
                }

                if status.is_success() {
                    data.emit(TransactionEvent::SuccessResponse {
                        transaction_id,
                        response,
                    })
                    .await;
                } else {
                    data.emit(TransactionEvent::FailureResponse {
                        transaction_id,
                        response,
                    })
                    .await;
                }
                if data.is_reliable() {
                    Ok(Some(TransactionState::Terminated))
                } else {
                    Ok(Some(TransactionState::Completed))
                }
            }
            _ => {
                trace!(id = %data.key, state = ?current_state, "Absorbing response");
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
            (TransactionTimer::E, TransactionState::Trying | TransactionState::Proceeding) => {
                data.retransmit_request().await?;
                timers.interval = if current_state == TransactionState::Trying {
                    data.settings.backoff(timers.interval)
                } else {
                    data.settings.t2
                };
                timers.start(data, TransactionTimer::E, timers.interval);
                Ok(None)
            }
            (TransactionTimer::F, TransactionState::Trying | TransactionState::Proceeding) => {
                debug!(id = %data.key, method = %data.method, "Timer F fired, request timed out");
                data.emit(TransactionEvent::TransactionTimeout {
                    transaction_id: data.key.clone(),
                })
                .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TransactionTimer::K, TransactionState::Completed) => Ok(Some(TransactionState::Terminated)),
            _ => {
                trace!(id = %data.key, %timer, state = ?current_state, "Stale timer ignored");
                Ok(None)
            }
        }
    }
}
