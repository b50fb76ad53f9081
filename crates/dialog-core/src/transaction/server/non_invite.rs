//! Non-INVITE server transaction (RFC 3261 §17.2.2, Figure 8)

use std::sync::Arc;

use async_trait::async_trait;
use sipflow_sip_core::prelude::*;
use tracing::trace;

use crate::transaction::data::{TimerHandles, TransactionData};
use crate::transaction::error::{Error, Result};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::server::server_response_transition;
use crate::transaction::{
    TransactionEvent, TransactionKind, TransactionState, TransactionTimer,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ServerNonInviteLogic;

#[async_trait]
impl TransactionLogic for ServerNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    async fn on_enter_state(
        &self,
        data: &Arc<TransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<()> {
        if new_state == TransactionState::Completed {
            timers.start(data, TransactionTimer::J, data.settings.timer_j(data.is_reliable()));
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
        if request.method != data.method {
            trace!(id = %data.key, method = %request.method, "Ignoring foreign request");
            return Ok(None);
        }

        // In Trying there is nothing to resend yet
        if matches!(current_state, TransactionState::Proceeding | TransactionState::Completed) {
            data.retransmit_response().await?;
        }
        if data.raise_retransmit_events {
            data.emit(TransactionEvent::Retransmission {
                transaction_id: data.key.clone(),
            })
            .await;
        }
        Ok(None)
    }

    async fn send_response(
        &self,
        data: &Arc<TransactionData>,
        response: Response,
        current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        let next = server_response_transition(TransactionKind::NonInviteServer, current_state, response.status())?;
        data.transmit_response(response).await?;
        // Timer J is zero on reliable transports
        if next == Some(TransactionState::Completed) && data.is_reliable() {
            return Ok(Some(TransactionState::Terminated));
        }
        Ok(next)
    }

    async fn handle_timer(
        &self,
        data: &Arc<TransactionData>,
        timer: TransactionTimer,
        current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        match (timer, current_state) {
            (TransactionTimer::J, TransactionState::Completed) => Ok(Some(TransactionState::Terminated)),
            _ => {
                trace!(id = %data.key, %timer, state = ?current_state, "Stale timer ignored");
                Ok(None)
            }
        }
    }
}
