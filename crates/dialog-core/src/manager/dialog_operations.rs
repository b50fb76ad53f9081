//! Dialog lifecycle and in-dialog requests

use std::sync::Arc;

use async_trait::async_trait;
use sipflow_sip_core::prelude::*;
use tracing::{debug, info, warn};

use super::core::{SipStack, StackCommand, StackInner};
use crate::dialog::{DialogId, DialogState, ReInviteDispatch, ReInviteSender, SharedDialog};
use crate::errors::{DialogError, DialogResult};
use crate::events::{DialogErrorEvent, DialogErrorKind, DialogTerminatedEvent};
use crate::transaction::{ClientTransaction, ServerTransaction};

impl SipStack {
    /// Creates a dialog for a client transaction when automatic dialog
    /// support did not, or returns the one it already has
    pub fn create_dialog(&self, transaction: &ClientTransaction) -> DialogResult<DialogId> {
        if let Some(id) = self.inner.registry.dialog_of_transaction(transaction.key()) {
            return Ok(id);
        }
        let request = transaction.original_request()?;
        if !request.method.creates_dialog() {
            return Err(DialogError::protocol_error(format!(
                "{} does not create a dialog",
                request.method
            )));
        }
        self.inner
            .create_default_dialog(&request, transaction.key(), transaction.remote_addr())
    }

    /// Server-side counterpart of [`create_dialog`](Self::create_dialog)
    pub fn create_server_dialog(&self, transaction: &ServerTransaction) -> DialogResult<DialogId> {
        if let Some(id) = self.inner.registry.dialog_of_transaction(transaction.key()) {
            return Ok(id);
        }
        let request = transaction.original_request()?;
        if !request.method.creates_dialog() {
            return Err(DialogError::protocol_error(format!(
                "{} does not create a dialog",
                request.method
            )));
        }
        self.inner.create_server_dialog(transaction, &request, None)
    }

    pub fn get_dialog(&self, id: &DialogId) -> Option<SharedDialog> {
        self.inner.registry.dialog(id)
    }

    pub fn dialog_state(&self, id: &DialogId) -> Option<DialogState> {
        self.get_dialog(id).map(|d| d.lock().state())
    }

    /// Dialog of a transaction, if one was bound to it
    pub fn dialog_of(&self, transaction: &crate::transaction::TransactionKey) -> Option<DialogId> {
        self.inner.registry.dialog_of_transaction(transaction)
    }

    /// Terminates a dialog and removes it immediately
    pub fn delete_dialog(&self, id: &DialogId) -> DialogResult<()> {
        let dialog = self.get_dialog(id).ok_or_else(|| DialogError::not_found(id))?;
        self.inner.terminate_dialog(*id, &dialog);
        self.inner.remove_dialog(id);
        Ok(())
    }

    /// Builds the next in-dialog request with a fresh CSeq
    pub fn create_request(&self, id: &DialogId, method: Method) -> DialogResult<Request> {
        let dialog = self.get_dialog(id).ok_or_else(|| DialogError::not_found(id))?;
        let request = dialog.lock().create_request(method)?;
        Ok(request)
    }

    /// Builds the ACK for the INVITE 2xx with CSeq `cseq`
    pub fn create_ack(&self, id: &DialogId, cseq: u32) -> DialogResult<Request> {
        let dialog = self.get_dialog(id).ok_or_else(|| DialogError::not_found(id))?;
        let ack = dialog.lock().create_ack(cseq)?;
        Ok(ack)
    }

    /// Sends an ACK for a 2xx. ACKs for 2xx have no transaction; the dialog
    /// keeps the last one to answer retransmitted 2xx responses.
    pub async fn send_ack(&self, id: &DialogId, ack: Request) -> DialogResult<()> {
        self.inner.send_ack(*id, ack).await
    }

    /// Sends a request inside a dialog. In back-to-back user agent mode an
    /// INVITE waits (bounded) until the previous INVITE has been ACKed.
    pub async fn send_request_in_dialog(&self, id: &DialogId, request: Request) -> DialogResult<ClientTransaction> {
        if self.inner.config.back_to_back_ua && request.method == Method::Invite {
            let sender = self
                .inner
                .reinvite_senders
                .entry(*id)
                .or_insert_with(|| ReInviteSender::spawn(*id, Arc::downgrade(&self.inner)))
                .clone();
            return sender.send(request).await;
        }
        self.inner.send_in_dialog(*id, request).await
    }
}

#[async_trait]
impl ReInviteDispatch for StackInner {
    async fn dispatch_reinvite(&self, dialog: DialogId, request: Request) -> DialogResult<ClientTransaction> {
        let gate = self
            .registry
            .dialog(&dialog)
            .ok_or_else(|| DialogError::not_found(&dialog))?
            .lock()
            .ack_gate();
        if !gate.acquire(self.config.reinvite_ack_wait).await {
            warn!(dialog = %dialog, "Timed out waiting for the previous INVITE to be acknowledged");
            self.listener.on_dialog_error_event(DialogErrorEvent {
                dialog,
                error: DialogErrorKind::ReInviteTimeout,
            });
            return Err(DialogError::concurrency_error(format!(
                "ACK gate of dialog {} not released within {:?}",
                dialog, self.config.reinvite_ack_wait
            )));
        }
        match self.send_in_dialog(dialog, request).await {
            Ok(transaction) => Ok(transaction),
            Err(e) => {
                gate.release();
                Err(e)
            }
        }
    }
}

impl StackInner {
    pub(crate) async fn send_in_dialog(&self, id: DialogId, request: Request) -> DialogResult<ClientTransaction> {
        let dialog = self.registry.dialog(&id).ok_or_else(|| DialogError::not_found(&id))?;
        let destination = {
            let d = dialog.lock();
            if d.is_terminated() {
                return Err(DialogError::invalid_state(format!("Dialog {} is terminated", id)));
            }
            d.remote_addr()
                .ok_or_else(|| DialogError::invalid_state(format!("Dialog {} has no remote address", id)))?
        };
        let transaction = self.create_client_transaction(request, destination)?;
        dialog.lock().set_last_transaction(transaction.key().clone());
        self.registry.link_transaction(transaction.key(), id);
        transaction.send_request().await?;
        Ok(transaction)
    }

    pub(crate) async fn send_ack(&self, id: DialogId, ack: Request) -> DialogResult<()> {
        if ack.method != Method::Ack {
            return Err(DialogError::protocol_error(format!("{} is not an ACK", ack.method)));
        }
        let dialog = self.registry.dialog(&id).ok_or_else(|| DialogError::not_found(&id))?;
        let destination = dialog
            .lock()
            .remote_addr()
            .ok_or_else(|| DialogError::invalid_state(format!("Dialog {} has no remote address", id)))?;
        self.transport
            .send_message(Message::Request(ack.clone()), destination)
            .await?;
        let ack_wait = {
            let mut d = dialog.lock();
            d.ack_sent(&ack);
            d.timers.ack_wait.take()
        };
        if let Some(timer) = ack_wait {
            self.timers.cancel(timer);
        }
        debug!(dialog = %id, "ACK sent");
        Ok(())
    }

    pub(crate) fn register_dialog_key(&self, id: DialogId, dialog: &SharedDialog) {
        let Some(key) = dialog.lock().key() else {
            return;
        };
        let owner = self.registry.register_dialog_key(&key, id);
        if owner != id {
            debug!(dialog = %id, existing = %owner, "Dialog key already registered");
        }
    }

    /// Reacts to a dialog state change: indexes the dialog, arms or cancels
    /// the early timer and tears it down on termination
    pub(crate) fn dialog_state_changed(&self, id: DialogId, dialog: &SharedDialog, change: Option<DialogState>) {
        let state = dialog.lock().state();
        if matches!(state, DialogState::Early | DialogState::Confirmed) {
            self.register_dialog_key(id, dialog);
        }
        match change {
            Some(DialogState::Early) => {
                let mut d = dialog.lock();
                if d.timers.early_timeout.is_none() {
                    d.timers.early_timeout = Some(
                        self.schedule_command(self.config.early_dialog_timeout(), StackCommand::EarlyTimeout(id)),
                    );
                }
            }
            Some(DialogState::Confirmed) => {
                if let Some(timer) = dialog.lock().timers.early_timeout.take() {
                    self.timers.cancel(timer);
                }
            }
            Some(DialogState::Terminated) => self.dialog_terminated(id, dialog),
            _ => {}
        }
    }

    /// Terminates the dialog if it is not already, with the usual teardown
    pub(crate) fn terminate_dialog(&self, id: DialogId, dialog: &SharedDialog) {
        if dialog.lock().terminate() {
            self.dialog_terminated(id, dialog);
        }
    }

    /// Cancels the dialog's timers, notifies the listener and schedules removal
    fn dialog_terminated(&self, id: DialogId, dialog: &SharedDialog) {
        for timer in dialog.lock().timers.take_all() {
            self.timers.cancel(timer);
        }
        self.reinvite_senders.remove(&id);
        info!(dialog = %id, "Dialog terminated");
        self.listener.on_dialog_terminated(DialogTerminatedEvent { dialog: id });
        self.schedule_command(self.config.dialog_linger, StackCommand::RemoveDialog(id));
    }

    pub(crate) fn remove_dialog(&self, id: &DialogId) {
        if let Some(dialog) = self.registry.remove_dialog(id) {
            for timer in dialog.lock().timers.take_all() {
                self.timers.cancel(timer);
            }
            debug!(dialog = %id, "Dialog removed");
        }
        self.reinvite_senders.remove(id);
    }

    pub(crate) fn start_2xx_retransmission(&self, id: DialogId, dialog: &SharedDialog) {
        let mut d = dialog.lock();
        if let Some(previous) = d.timers.retransmit_2xx.take() {
            self.timers.cancel(previous);
        }
        let interval = d.retransmit_interval();
        d.timers.retransmit_2xx = Some(self.schedule_command(interval, StackCommand::Retransmit2xx(id)));
    }

    pub(crate) fn raise_dialog_error(&self, dialog: DialogId, error: DialogErrorKind) {
        warn!(dialog = %dialog, ?error, "Dialog error");
        self.listener.on_dialog_error_event(DialogErrorEvent { dialog, error });
    }
}
