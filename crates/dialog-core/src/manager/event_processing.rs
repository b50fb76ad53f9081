//! Event loop handlers
//!
//! Runs on the event task. Transaction runners block on the event channel
//! while it is full, so nothing here may await a reply from a transaction;
//! such work is spawned.

use std::sync::Arc;

use sipflow_sip_core::prelude::*;
use tracing::{debug, info, trace, warn};

use super::core::{StackCommand, StackInner};
use crate::dialog::{DialogId, DialogState, RetransmitTick, SharedDialog};
use crate::errors::{DialogError, DialogResult};
use crate::events::{
    DialogErrorKind, ResponseEvent, Timeout, TimeoutEvent, TransactionTerminatedEvent, TransportErrorEvent,
};
use crate::registry::DefaultDialogClaim;
use crate::transaction::{TransactionEvent, TransactionKey};

impl StackInner {
    pub(crate) async fn handle_transaction_event(self: &Arc<Self>, event: TransactionEvent) {
        match event {
            TransactionEvent::ProvisionalResponse { transaction_id, response }
            | TransactionEvent::SuccessResponse { transaction_id, response }
            | TransactionEvent::FailureResponse { transaction_id, response } => {
                self.client_response(&transaction_id, response);
            }
            TransactionEvent::AckReceived { transaction_id, .. } => {
                trace!(id = %transaction_id, "ACK absorbed by INVITE server transaction");
            }
            TransactionEvent::Retransmission { transaction_id } => {
                self.listener.on_timeout_event(TimeoutEvent {
                    timeout: Timeout::Retransmit,
                    dialog: self.registry.dialog_of_transaction(&transaction_id),
                    is_server: transaction_id.is_server,
                    transaction: Some(transaction_id),
                });
            }
            TransactionEvent::TransactionTimeout { transaction_id } => self.transaction_timeout(transaction_id),
            TransactionEvent::AckTimeout { transaction_id } => {
                debug!(id = %transaction_id, "No ACK for non-2xx final response");
                self.registry.remove_pending_ack(&transaction_id);
                self.listener.on_timeout_event(TimeoutEvent {
                    timeout: Timeout::Transaction,
                    dialog: self.registry.dialog_of_transaction(&transaction_id),
                    is_server: true,
                    transaction: Some(transaction_id),
                });
            }
            TransactionEvent::ReliableProvisionalTimeout { transaction_id, rseq } => {
                self.prack_timeout(transaction_id, rseq);
            }
            TransactionEvent::TransportError { transaction_id, error } => {
                warn!(id = %transaction_id, %error, "Transport error on transaction");
                self.abandon_unconfirmed_dialog(&transaction_id);
                self.listener.on_transport_error(TransportErrorEvent {
                    transaction: Some(transaction_id),
                    error,
                });
            }
            TransactionEvent::StateChanged {
                transaction_id,
                previous_state,
                new_state,
            } => {
                trace!(id = %transaction_id, "Transaction state {} -> {}", previous_state, new_state);
            }
            TransactionEvent::Error { transaction_id, error } => {
                warn!(id = ?transaction_id, %error, "Transaction error");
            }
            TransactionEvent::TransactionTerminated { transaction_id } => {
                self.registry.remove_pending_ack(&transaction_id);
                self.listener.on_transaction_terminated(TransactionTerminatedEvent {
                    transaction: transaction_id.clone(),
                });
                self.schedule_command(
                    self.config.transaction_linger,
                    StackCommand::RemoveTransaction(transaction_id),
                );
            }
        }
    }

    /// Binds a response received on a client transaction (or a late 2xx or
    /// fork) to its dialog and hands it to the listener
    pub(crate) fn client_response(&self, key: &TransactionKey, response: Response) {
        let transaction = self.registry.client_transaction(key);
        let dialog = self.bind_response_dialog(key, &response);
        let mut is_retransmission = false;

        if let Some((id, dialog)) = &dialog {
            let status = response.status();
            let cseq = response.cseq().cloned();
            let is_invite = cseq.as_ref().is_some_and(|c| c.method == Method::Invite);
            let (change, ends_dialog, arm_ack_wait) = {
                let mut d = dialog.lock();
                if let Some(cseq) = &cseq {
                    is_retransmission = d.is_retransmission(status.as_u16(), cseq.seq, &cseq.method);
                }
                let in_dialog = d.first_transaction() != key && d.state() == DialogState::Confirmed;
                let change = d.set_last_response(key, &response);
                if in_dialog && is_invite && status.as_u16() >= 300 {
                    d.ack_gate().release();
                }
                let ends_dialog = in_dialog
                    && matches!(
                        status,
                        StatusCode::CallOrTransactionDoesNotExist | StatusCode::RequestTimeout
                    );
                let arm_ack_wait = is_invite
                    && status.is_success()
                    && !is_retransmission
                    && d.state() == DialogState::Confirmed
                    && d.timers.ack_wait.is_none();
                (change, ends_dialog, arm_ack_wait)
            };

            if arm_ack_wait {
                if let Some(cseq) = &cseq {
                    let timer = self.schedule_command(self.config.ack_timeout(), StackCommand::AckNotSent(*id, cseq.seq));
                    dialog.lock().timers.ack_wait = Some(timer);
                }
            }
            self.dialog_state_changed(*id, dialog, change);
            if ends_dialog {
                info!(dialog = %id, status = status.as_u16(), "In-dialog request failed, terminating dialog");
                self.terminate_dialog(*id, dialog);
            }
        }

        if response.status_code() >= 300 && !key.is_server {
            self.terminate_early_forks(key);
        }

        self.listener.on_response_event(ResponseEvent {
            response,
            transaction,
            dialog: dialog.map(|(id, _)| id),
            is_retransmission,
        });
    }

    /// Ends every early dialog `key` created once that request has failed;
    /// forks other than the one the final response names included
    pub(crate) fn terminate_early_forks(&self, key: &TransactionKey) {
        for id in self.registry.dialogs_created_by(key) {
            let Some(dialog) = self.registry.dialog(&id) else {
                continue;
            };
            let early = {
                let d = dialog.lock();
                d.first_transaction() == key && d.state() <= DialogState::Early
            };
            if early {
                debug!(dialog = %id, id = %key, "Creating request failed, ending early dialog");
                self.terminate_dialog(id, &dialog);
            }
        }
    }

    /// Dialog of a response: the one indexed under its dialog key, the
    /// transaction's default dialog claimed by (or forked for) this To-tag,
    /// or whatever dialog the transaction is linked to
    fn bind_response_dialog(&self, key: &TransactionKey, response: &Response) -> Option<(DialogId, SharedDialog)> {
        if let Some(dialog_key) = response.dialog_id(false) {
            if let Some(found) = self.registry.dialog_by_key(&dialog_key) {
                return Some(found);
            }
            let status = response.status();
            let creates = (status.is_provisional() && status != StatusCode::Trying) || status.is_success();
            if let (true, Some(remote_tag)) = (creates, response.to_tag()) {
                match self.registry.claim_default_dialog(key, remote_tag) {
                    DefaultDialogClaim::Claimed(id) => {
                        if let Some(dialog) = self.registry.dialog(&id) {
                            return Some((id, dialog));
                        }
                    }
                    DefaultDialogClaim::Forked(base) => {
                        if let Some(forked) = self.fork_dialog(&base) {
                            return Some(forked);
                        }
                    }
                    DefaultDialogClaim::Missing => {}
                }
            }
        }
        self.registry
            .dialog_of_transaction(key)
            .and_then(|id| self.registry.dialog(&id).map(|d| (id, d)))
    }

    fn transaction_timeout(self: &Arc<Self>, key: TransactionKey) {
        let dialog_id = self.registry.dialog_of_transaction(&key);
        debug!(id = %key, dialog = ?dialog_id, "Transaction timed out");
        self.listener.on_timeout_event(TimeoutEvent {
            timeout: Timeout::Transaction,
            transaction: Some(key.clone()),
            dialog: dialog_id,
            is_server: key.is_server,
        });

        if key.method == Method::Cancel && !key.is_server {
            if let Some(invite) = self.registry.client_transaction(&key.with_method(Method::Invite)) {
                if invite.state().is_pending() {
                    info!(id = %invite.key(), "CANCEL timed out, terminating INVITE transaction");
                    tokio::spawn(async move { invite.terminate().await });
                }
            }
        }

        let Some((id, dialog)) = dialog_id.and_then(|id| self.registry.dialog(&id).map(|d| (id, d))) else {
            return;
        };
        let (state, created_it) = {
            let d = dialog.lock();
            (d.state(), d.first_transaction() == &key)
        };
        if created_it && state <= DialogState::Early {
            self.terminate_dialog(id, &dialog);
            self.remove_dialog(&id);
            self.terminate_early_forks(&key);
        } else if !key.is_server && !state.is_terminated() {
            if key.method == Method::Invite {
                dialog.lock().ack_gate().release();
            }
            info!(dialog = %id, id = %key, "In-dialog request timed out, terminating dialog");
            self.terminate_dialog(id, &dialog);
        }
    }

    /// A reliable 1xx was never PRACKed. With automatic error handling the
    /// INVITE is answered with 500.
    fn prack_timeout(self: &Arc<Self>, key: TransactionKey, rseq: u32) {
        debug!(id = %key, rseq, "Reliable provisional response not acknowledged");
        if let Some(id) = self.registry.dialog_of_transaction(&key) {
            self.raise_dialog_error(id, DialogErrorKind::PrackNotReceived);
        }
        if !self.config.dialog_error_auto_handling {
            return;
        }
        let Some(transaction) = self.registry.server_transaction(&key).filter(|t| t.state().is_pending()) else {
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            let result: DialogResult<()> = async {
                let request = transaction.original_request()?;
                let response = SimpleResponseBuilder::response_from_request(&request, StatusCode::ServerInternalError)
                    .reason("Reliable provisional response not acknowledged")
                    .build()?;
                this.send_response(&transaction, response, false).await?;
                Ok(())
            }
            .await;
            if let Err(e) = result {
                warn!(id = %transaction.key(), error = %e, "Could not reject unacknowledged INVITE");
            }
        });
    }

    /// Removes the dialog a failed dialog-creating transaction left behind
    fn abandon_unconfirmed_dialog(&self, key: &TransactionKey) {
        let Some(id) = self.registry.dialog_of_transaction(key) else {
            return;
        };
        let Some(dialog) = self.registry.dialog(&id) else {
            return;
        };
        let unconfirmed = {
            let d = dialog.lock();
            d.first_transaction() == key && d.state() <= DialogState::Early
        };
        if unconfirmed {
            self.terminate_dialog(id, &dialog);
            self.remove_dialog(&id);
        }
    }

    pub(crate) async fn handle_command(self: &Arc<Self>, command: StackCommand) {
        match command {
            StackCommand::Retransmit2xx(id) => self.retransmit_2xx(id).await,
            StackCommand::AckNotSent(id, cseq) => self.ack_not_sent(id, cseq),
            StackCommand::EarlyTimeout(id) => {
                let Some(dialog) = self.registry.dialog(&id) else {
                    return;
                };
                let early = {
                    let mut d = dialog.lock();
                    d.timers.early_timeout = None;
                    d.state() <= DialogState::Early
                };
                if early {
                    self.raise_dialog_error(id, DialogErrorKind::EarlyStateTimeout);
                    self.terminate_dialog(id, &dialog);
                }
            }
            StackCommand::RemoveTransaction(key) => {
                let stale_default = self
                    .registry
                    .default_dialog(&key)
                    .and_then(|id| self.registry.dialog(&id).map(|d| (id, d)))
                    .filter(|(_, d)| d.lock().state() == DialogState::Null);
                if let Some((id, dialog)) = stale_default {
                    self.terminate_dialog(id, &dialog);
                    self.remove_dialog(&id);
                }
                self.registry.remove_transaction(&key);
                trace!(id = %key, "Transaction removed");
            }
            StackCommand::RemoveDialog(id) => self.remove_dialog(&id),
        }
    }

    async fn retransmit_2xx(&self, id: DialogId) {
        let Some(dialog) = self.registry.dialog(&id) else {
            return;
        };
        let (tick, destination) = {
            let mut d = dialog.lock();
            d.timers.retransmit_2xx = None;
            (d.on_retransmit_tick(), d.remote_addr())
        };
        match tick {
            RetransmitTick::Resend { response, next } => {
                if !self.transport.is_reliable() {
                    if let Some(destination) = destination {
                        trace!(dialog = %id, "Retransmitting 2xx");
                        if let Err(e) = self.transport.send_message(Message::Response(response), destination).await {
                            warn!(dialog = %id, error = %e, "2xx retransmission failed");
                        }
                    }
                }
                let timer = self.schedule_command(next, StackCommand::Retransmit2xx(id));
                dialog.lock().timers.retransmit_2xx = Some(timer);
            }
            RetransmitTick::GiveUp => {
                if self.config.ack_timeout_terminates_dialog {
                    self.raise_dialog_error(id, DialogErrorKind::AckNotReceived);
                    self.terminate_dialog(id, &dialog);
                } else {
                    dialog.lock().ack_gate().release();
                    debug!(dialog = %id, "No ACK for 2xx, dialog kept");
                    self.listener.on_timeout_event(TimeoutEvent {
                        timeout: Timeout::Dialog,
                        transaction: None,
                        dialog: Some(id),
                        is_server: true,
                    });
                }
            }
            RetransmitTick::Stop => {}
        }
    }

    /// The application did not ACK a 2xx it received. With automatic error
    /// handling the stack ACKs it and hangs up.
    fn ack_not_sent(self: &Arc<Self>, id: DialogId, cseq: u32) {
        let Some(dialog) = self.registry.dialog(&id) else {
            return;
        };
        let unacknowledged = {
            let mut d = dialog.lock();
            d.timers.ack_wait = None;
            !d.is_terminated() && d.last_ack_cseq().is_none_or(|acked| acked < cseq)
        };
        if !unacknowledged {
            return;
        }
        self.raise_dialog_error(id, DialogErrorKind::AckNotSent);
        if !self.config.dialog_error_auto_handling {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let result: DialogResult<()> = async {
                let dialog = this.registry.dialog(&id).ok_or_else(|| DialogError::not_found(&id))?;
                let (ack, bye) = {
                    let mut d = dialog.lock();
                    (d.create_ack(cseq)?, d.create_request(Method::Bye)?)
                };
                this.send_ack(id, ack).await?;
                this.send_in_dialog(id, bye).await?;
                Ok(())
            }
            .await;
            match result {
                Ok(()) => info!(dialog = %id, "Sent missing ACK and BYE"),
                Err(e) => warn!(dialog = %id, error = %e, "Could not close unacknowledged dialog"),
            }
        });
    }
}
