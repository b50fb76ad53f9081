//! Creating transactions and sending through them
//!
//! Requests and responses of the application enter the transaction layer
//! here. This is also where dialogs are created automatically: a default
//! client dialog for every dialog-creating request we send, a server dialog
//! for the first tagged 1xx or 2xx we answer one with.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use sipflow_sip_core::prelude::*;
use tracing::{debug, trace};

use super::core::{SipStack, StackInner};
use crate::dialog::{Dialog, DialogId, SharedDialog};
use crate::errors::DialogResult;
use crate::routing::ensure_branch;
use crate::transaction::{ClientTransaction, ServerTransaction, TransactionKey};

impl SipStack {
    /// Creates (but does not send) a client transaction for `request`.
    ///
    /// The topmost Via gets a branch if it has none. With automatic dialog
    /// support a dialog-creating request also gets a default dialog, which the
    /// first tagged response claims.
    pub fn create_client_transaction(
        &self,
        request: Request,
        destination: SocketAddr,
    ) -> DialogResult<ClientTransaction> {
        self.inner.create_client_transaction(request, destination)
    }

    /// Sends the request of a transaction created by
    /// [`create_client_transaction`](Self::create_client_transaction)
    pub async fn send_request(&self, transaction: &ClientTransaction) -> DialogResult<()> {
        transaction.send_request().await?;
        Ok(())
    }

    /// Sends a response on a server transaction, creating or updating the
    /// dialog it belongs to
    pub async fn send_response(&self, transaction: &ServerTransaction, response: Response) -> DialogResult<()> {
        self.inner.send_response(transaction, response, false).await.map(|_| ())
    }

    /// Sends a 1xx reliably (RFC 3262) and returns its RSeq
    pub async fn send_reliable_provisional(
        &self,
        transaction: &ServerTransaction,
        response: Response,
    ) -> DialogResult<u32> {
        let rseq = self.inner.send_response(transaction, response, true).await?;
        Ok(rseq.unwrap_or_default())
    }

    pub fn client_transaction(&self, key: &TransactionKey) -> Option<ClientTransaction> {
        self.inner.registry.client_transaction(key)
    }

    pub fn server_transaction(&self, key: &TransactionKey) -> Option<ServerTransaction> {
        self.inner.registry.server_transaction(key)
    }
}

impl StackInner {
    pub(crate) fn create_client_transaction(
        &self,
        mut request: Request,
        destination: SocketAddr,
    ) -> DialogResult<ClientTransaction> {
        request.check_mandatory_headers()?;
        ensure_branch(&mut request);

        let transaction = ClientTransaction::new(request.clone(), destination, self.transaction_context())?;
        let key = transaction.key().clone();
        debug!(id = %key, %destination, "Created client transaction");
        self.registry.insert_client_transaction(transaction.clone());

        if request.to_tag().is_some() {
            let dialog = request
                .dialog_id(false)
                .and_then(|dialog_key| self.registry.dialog_by_key(&dialog_key));
            if let Some((id, dialog)) = dialog {
                dialog.lock().set_last_transaction(key.clone());
                self.registry.link_transaction(&key, id);
            }
        } else if self.config.automatic_dialog_support && request.method.creates_dialog() {
            self.create_default_dialog(&request, &key, destination)?;
        }
        Ok(transaction)
    }

    /// The dialog a client transaction starts with, before any response
    pub(crate) fn create_default_dialog(
        &self,
        request: &Request,
        key: &TransactionKey,
        destination: SocketAddr,
    ) -> DialogResult<DialogId> {
        let mut dialog = Dialog::new_client(request, key.clone(), self.dialog_settings.clone())?;
        dialog.set_remote_addr(destination);
        let id = dialog.id();
        self.registry.insert_dialog(id, Arc::new(Mutex::new(dialog)));
        self.registry.set_default_dialog(key, id);
        self.registry.link_transaction(key, id);
        trace!(dialog = %id, id = %key, "Created default dialog");
        Ok(id)
    }

    /// Host and port peers reach us at: the configured advertised address,
    /// else the bound socket address
    pub(crate) fn listening_point(&self) -> Option<(String, u16)> {
        let bound = self.transport.local_addr().ok();
        let host = match &self.config.advertised_host {
            Some(host) => host.clone(),
            None => bound?.ip().to_string(),
        };
        let port = self.config.advertised_port.or(bound.map(|addr| addr.port()))?;
        Some((host, port))
    }

    /// Via for requests we originate inside server dialogs
    pub(crate) fn local_via(&self) -> Option<Via> {
        let (host, port) = self.listening_point()?;
        Some(Via::new(self.transport.kind().via_token(), host, Some(port)))
    }

    pub(crate) async fn send_response(
        &self,
        transaction: &ServerTransaction,
        mut response: Response,
        reliable: bool,
    ) -> DialogResult<Option<u32>> {
        let request = transaction.original_request()?;
        let key = transaction.key().clone();
        let dialog = self.dialog_for_response(transaction, &request, &mut response)?;

        let rseq = if reliable {
            Some(transaction.send_reliable_provisional(response.clone()).await?)
        } else {
            self.respond(transaction, response.clone()).await?;
            None
        };

        if let Some((id, dialog)) = dialog {
            self.response_sent(id, &dialog, &key, &response);
        }
        Ok(rseq)
    }

    /// Finds the dialog of a server transaction, creating it for the first
    /// tagged 1xx/2xx to a dialog-creating request. Adds the dialog's local
    /// tag to `response` when it has none.
    fn dialog_for_response(
        &self,
        transaction: &ServerTransaction,
        request: &Request,
        response: &mut Response,
    ) -> DialogResult<Option<(DialogId, SharedDialog)>> {
        let status = response.status();
        let tagged = status != StatusCode::Trying;

        let existing = self
            .registry
            .dialog_of_transaction(transaction.key())
            .and_then(|id| self.registry.dialog(&id).map(|d| (id, d)));
        if let Some((id, dialog)) = existing {
            if tagged && response.to_tag().is_none() {
                let local_tag = dialog.lock().local_tag().map(str::to_string);
                if let Some(to) = response.to_mut() {
                    to.set_tag(local_tag.unwrap_or_else(generate_tag));
                }
            }
            return Ok(Some((id, dialog)));
        }

        let creates = self.config.automatic_dialog_support
            && request.method.creates_dialog()
            && request.to_tag().is_none()
            && tagged
            && (status.is_provisional() || status.is_success());
        if !creates {
            return Ok(None);
        }
        if response.to_tag().is_none() {
            if let Some(to) = response.to_mut() {
                to.set_tag(generate_tag());
            }
        }
        let id = self.create_server_dialog(transaction, request, response.contacts().first().map(|c| c.uri.clone()))?;
        Ok(self.registry.dialog(&id).map(|d| (id, d)))
    }

    pub(crate) fn create_server_dialog(
        &self,
        transaction: &ServerTransaction,
        request: &Request,
        contact: Option<Uri>,
    ) -> DialogResult<DialogId> {
        let key = transaction.key().clone();
        let mut dialog = Dialog::new_server(request, key.clone(), self.dialog_settings.clone())?;
        dialog.set_remote_addr(transaction.remote_addr());
        if let Some(via) = self.local_via() {
            dialog.set_local_via(via);
        }
        let contact = contact.or_else(|| {
            let (host, port) = self.listening_point()?;
            Some(Uri::sip(host).with_port(port))
        });
        if let Some(contact) = contact {
            dialog.set_local_contact(contact);
        }
        let id = dialog.id();
        self.registry.insert_dialog(id, Arc::new(Mutex::new(dialog)));
        self.registry.link_transaction(&key, id);
        debug!(dialog = %id, id = %key, "Created server dialog");
        Ok(id)
    }

    /// Feeds a response we sent into its dialog
    fn response_sent(&self, id: DialogId, dialog: &SharedDialog, key: &TransactionKey, response: &Response) {
        let is_invite_2xx = response.status().is_success()
            && response.cseq().is_some_and(|c| c.method == Method::Invite);
        let change = {
            let mut d = dialog.lock();
            let change = d.set_last_response(key, response);
            if is_invite_2xx && self.config.back_to_back_ua && !d.is_terminated() {
                d.ack_gate().try_acquire();
            }
            change
        };
        if is_invite_2xx {
            self.start_2xx_retransmission(id, dialog);
        }
        self.dialog_state_changed(id, dialog, change);
    }
}
