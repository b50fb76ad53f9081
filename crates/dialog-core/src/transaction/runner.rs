//! # Transaction runner
//!
//! One tokio task per transaction. It owns the timer handles, receives every
//! stimulus as an [`InternalTransactionCommand`] and delegates the decisions to
//! a [`TransactionLogic`]. Because all stimuli pass through one queue, a timer
//! firing and a response arriving for the same transaction are never processed
//! concurrently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::transaction::data::{TimerHandles, TransactionData};
use crate::transaction::error::Error;
use crate::transaction::logic::TransactionLogic;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TransactionEvent, TransactionState,
};

/// Drives a transaction until it reaches Terminated or every handle is dropped
pub async fn run_transaction_loop<L>(
    data: Arc<TransactionData>,
    logic: Arc<L>,
    mut cmd_rx: mpsc::Receiver<InternalTransactionCommand>,
) where
    L: TransactionLogic,
{
    let mut timers = TimerHandles::default();
    let tx_id = data.key.clone();
    let initial = data.state.get();
    debug!(id = %tx_id, state = ?initial, kind = ?logic.kind(), "Transaction loop starting");

    // Server transactions are born in their first active state
    if logic.kind().is_server() {
        if let Err(e) = logic.on_enter_state(&data, initial, initial, &mut timers).await {
            error!(id = %tx_id, error = %e, "Error entering initial state");
            data.emit_error(&e).await;
        }
    }

    while let Some(command) = cmd_rx.recv().await {
        let current_state = data.state.get();
        if current_state.is_terminated() {
            break;
        }
        trace!(id = %tx_id, ?command, "Transaction received command");

        let outcome = match command {
            InternalTransactionCommand::TransitionTo(state) => Ok(Some(state)),
            InternalTransactionCommand::ProcessMessage(message) => {
                logic
                    .process_message(&data, message, current_state, &mut timers)
                    .await
            }
            InternalTransactionCommand::Timer(timer) => {
                timers.fired(timer);
                logic
                    .handle_timer(&data, timer, current_state, &mut timers)
                    .await
            }
            InternalTransactionCommand::SendResponse { response, reply } => {
                match logic
                    .send_response(&data, response, current_state, &mut timers)
                    .await
                {
                    Ok(next) => {
                        let _ = reply.send(Ok(()));
                        Ok(next)
                    }
                    Err(e) => {
                        let terminate = matches!(e, Error::Transport(_));
                        let _ = reply.send(Err(e));
                        Ok(terminate.then_some(TransactionState::Terminated))
                    }
                }
            }
            InternalTransactionCommand::TransportError(error) => {
                error!(id = %tx_id, %error, "Transport error, terminating transaction");
                data.emit(TransactionEvent::TransportError {
                    transaction_id: tx_id.clone(),
                    error,
                })
                .await;
                Ok(Some(TransactionState::Terminated))
            }
            InternalTransactionCommand::Terminate => Ok(Some(TransactionState::Terminated)),
        };

        match outcome {
            Ok(Some(next_state)) => {
                transition(&data, logic.as_ref(), next_state, &mut timers).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(id = %tx_id, error = %e, state = ?current_state, "Transaction error");
                data.emit_error(&e).await;
            }
        }

        if data.state.get().is_terminated() {
            break;
        }
    }

    timers.cancel_all(&data);
    data.clear_reliable();
    let previous = data.state.set(TransactionState::Terminated);
    data.request.lock().evict();
    debug!(id = %tx_id, ?previous, "Transaction loop finished");
    data.emit(TransactionEvent::TransactionTerminated {
        transaction_id: tx_id,
    })
    .await;
}

async fn transition<L: TransactionLogic>(
    data: &Arc<TransactionData>,
    logic: &L,
    requested: TransactionState,
    timers: &mut TimerHandles,
) {
    let current = data.state.get();
    if current == requested {
        trace!(id = %data.key, state = ?current, "Already in requested state");
        return;
    }
    if let Err(e) = AtomicTransactionState::validate_transition(logic.kind(), current, requested) {
        error!(id = %data.key, error = %e, "Invalid state transition {:?} -> {:?}", current, requested);
        data.emit_error(&e).await;
        return;
    }

    let previous = data.state.set(requested);
    debug!(id = %data.key, "State changed from {:?} to {:?}", previous, requested);
    if matches!(requested, TransactionState::Completed | TransactionState::Terminated) {
        data.request.lock().evict();
    }
    data.emit(TransactionEvent::StateChanged {
        transaction_id: data.key.clone(),
        previous_state: previous,
        new_state: requested,
    })
    .await;

    if requested.is_terminated() {
        return;
    }
    if let Err(e) = logic.on_enter_state(data, requested, previous, timers).await {
        error!(id = %data.key, error = %e, "Error entering state {:?}", requested);
        data.emit_error(&e).await;
    }
}
