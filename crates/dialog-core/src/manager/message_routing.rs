//! Inbound message routing
//!
//! Requests go through the dialog filter: retransmissions are absorbed by
//! their server transaction, ACKs are matched against dialogs and the
//! pending-ACK table, everything else is gated by the per-method rules in
//! [`crate::routing::rules`]. Responses are matched to their client
//! transaction by branch; responses without a live transaction are handled
//! here (ACK resend for retransmitted 2xx, late forks).

use std::net::SocketAddr;
use std::time::Duration;

use sipflow_sip_core::prelude::*;
use tracing::{debug, info, trace, warn};

use super::core::StackInner;
use crate::dialog::{DialogId, SharedDialog};
use crate::events::{RequestEvent, TransactionTerminatedEvent};
use crate::registry::DefaultDialogClaim;
use crate::routing::rules::{self, AckContext, FilterVerdict, ReInviteFacts, Rejection};
use crate::routing::{rejection_response, strip_own_route};
use crate::transaction::{ServerTransaction, TransactionKey, TransactionKind, TransactionState};

impl StackInner {
    pub(crate) async fn handle_message(&self, message: Message, source: SocketAddr) {
        match message {
            Message::Request(request) => self.handle_request(request, source).await,
            Message::Response(response) => self.handle_response(response).await,
        }
    }

    async fn handle_request(&self, mut request: Request, source: SocketAddr) {
        if let Err(e) = request.check_mandatory_headers() {
            debug!(error = %e, method = %request.method, %source, "Dropping malformed request");
            if request.method != Method::Ack && request.via().is_some() {
                self.reply_stateless(&request, source, &Rejection::new(StatusCode::BadRequest))
                    .await;
            }
            return;
        }
        if let Some((host, port)) = self.listening_point() {
            strip_own_route(&mut request, &host, port);
        }
        if request.method == Method::Ack {
            self.handle_ack(request, source).await;
            return;
        }

        let Some(key) = TransactionKey::from_request(&request, true) else {
            return;
        };
        if let Some(existing) = self.registry.server_transaction(&key) {
            trace!(id = %key, "Retransmitted request handed to its transaction");
            if let Err(e) = existing.process_request(request).await {
                trace!(id = %key, error = %e, "Transaction gone before retransmission");
            }
            return;
        }

        let merged = self.registry.is_merged_request(&request, &key);
        if let Some(verdict) = rules::merged_request_verdict(merged, self.config.dialog_error_auto_handling) {
            info!(id = %key, "Merged request detected");
            self.apply_verdict(verdict, request, source, None).await;
            return;
        }

        let dialog = self.dialog_of_request(&request);
        let validation = self.config.sequence_number_validation;
        let cseq = request.cseq().map(|c| c.seq).unwrap_or_default();
        let verdict = match request.method {
            Method::Cancel => {
                self.handle_cancel(request, source, key).await;
                return;
            }
            Method::Prack => {
                let matched = dialog.as_ref().and_then(|(_, d)| self.prack_transaction(d, &request));
                let verdict = rules::prack_verdict(
                    dialog.as_ref().map(|(_, d)| d.lock().check_sequence(cseq)),
                    matched.is_some(),
                    self.config.automatic_dialog_support,
                );
                if let (FilterVerdict::Deliver, Some(invite), Some(rack)) = (&verdict, &matched, request.rack()) {
                    invite.acknowledge_prack(rack);
                }
                verdict
            }
            Method::Notify => {
                let pending = request
                    .call_id()
                    .zip(request.to_tag())
                    .and_then(|(call_id, tag)| self.registry.subscription(call_id, tag))
                    .is_some();
                rules::notify_verdict(
                    dialog.as_ref().map(|(_, d)| d.lock().check_sequence(cseq)),
                    validation,
                    pending,
                    self.config.deliver_unsolicited_notify,
                )
            }
            _ if request.to_tag().is_none() => FilterVerdict::Deliver,
            Method::Invite => match &dialog {
                Some((_, d)) => {
                    let facts = self.reinvite_facts(d, cseq);
                    let seq = d.lock().check_sequence(cseq);
                    rules::reinvite_verdict(facts, seq, validation)
                }
                None => rules::no_dialog_verdict(self.config.automatic_dialog_support),
            },
            _ => match &dialog {
                Some((_, d)) => rules::sequence_verdict(d.lock().check_sequence(cseq), validation),
                None => rules::no_dialog_verdict(self.config.automatic_dialog_support),
            },
        };
        self.apply_verdict(verdict, request, source, dialog).await;
    }

    /// Live dialog a request with a To-tag belongs to
    fn dialog_of_request(&self, request: &Request) -> Option<(DialogId, SharedDialog)> {
        request
            .dialog_id(true)
            .and_then(|key| self.registry.dialog_by_key(&key))
            .filter(|(_, d)| !d.lock().is_terminated())
    }

    async fn apply_verdict(
        &self,
        verdict: FilterVerdict,
        request: Request,
        source: SocketAddr,
        dialog: Option<(DialogId, SharedDialog)>,
    ) {
        match verdict {
            FilterVerdict::Deliver => self.deliver_request(request, source, dialog).await,
            FilterVerdict::CreateFromNotify => Box::pin(self.create_from_notify(request, source)).await,
            FilterVerdict::Reject(rejection) => self.reject(request, source, &rejection).await,
            FilterVerdict::Drop(reason) => {
                debug!(method = %request.method, %source, reason, "Request dropped");
            }
            other => warn!(?other, method = %request.method, "Verdict does not apply to this request"),
        }
    }

    /// Creates the server transaction and hands the request to the listener
    async fn deliver_request(&self, request: Request, source: SocketAddr, dialog: Option<(DialogId, SharedDialog)>) {
        let Some(transaction) = self.new_server_transaction(&request, source) else {
            return;
        };
        let key = transaction.key().clone();
        let dialog_id = dialog.map(|(id, d)| {
            if request.method != Method::Cancel {
                let mut d = d.lock();
                d.apply_request(&request);
                d.set_last_transaction(key.clone());
            }
            self.registry.link_transaction(&key, id);
            id
        });

        let _dispatch = if request.method == Method::Invite {
            Some(transaction.lock_dispatch().await)
        } else {
            None
        };
        trace!(id = %key, dialog = ?dialog_id, "Delivering request");
        self.listener.on_request_event(RequestEvent {
            request,
            source,
            transaction: Some(transaction.clone()),
            dialog: dialog_id,
        });
    }

    fn new_server_transaction(&self, request: &Request, source: SocketAddr) -> Option<ServerTransaction> {
        match ServerTransaction::new(request.clone(), source, self.transaction_context()) {
            Ok(transaction) => {
                self.registry.insert_server_transaction(transaction.clone(), request);
                Some(transaction)
            }
            Err(e) => {
                warn!(error = %e, method = %request.method, "Could not create server transaction");
                None
            }
        }
    }

    /// Answers a request on a fresh server transaction without dispatching it
    async fn reject(&self, request: Request, source: SocketAddr, rejection: &Rejection) {
        let response = match rejection_response(&request, rejection) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Could not build automatic response");
                return;
            }
        };
        let Some(transaction) = self.new_server_transaction(&request, source) else {
            return;
        };
        info!(
            id = %transaction.key(),
            status = rejection.status.as_u16(),
            reason = rejection.reason.unwrap_or_default(),
            "Answering request automatically"
        );
        if let Err(e) = self.respond(&transaction, response).await {
            warn!(id = %transaction.key(), error = %e, "Automatic response failed");
        }
    }

    /// Sends on a server transaction; an INVITE answered with a non-2xx
    /// final response enters the pending-ACK table
    pub(crate) async fn respond(
        &self,
        transaction: &ServerTransaction,
        response: Response,
    ) -> crate::transaction::error::Result<()> {
        let awaits_ack = transaction.kind() == TransactionKind::InviteServer && response.status_code() >= 300;
        transaction.send_response(response).await?;
        if awaits_ack {
            self.registry.insert_pending_ack(transaction.clone());
        }
        Ok(())
    }

    async fn reply_stateless(&self, request: &Request, source: SocketAddr, rejection: &Rejection) {
        match rejection_response(request, rejection) {
            Ok(response) => {
                if let Err(e) = self.transport.send_message(Message::Response(response), source).await {
                    warn!(error = %e, %source, "Stateless response failed");
                }
            }
            Err(e) => debug!(error = %e, "Could not build stateless response"),
        }
    }

    async fn handle_ack(&self, ack: Request, source: SocketAddr) {
        let dialog = ack
            .dialog_id(true)
            .and_then(|key| self.registry.dialog_by_key(&key));
        let pending = TransactionKey::from_request(&ack, true).and_then(|key| self.registry.pending_ack(&key));
        let context = match &dialog {
            None => AckContext::NoDialog,
            Some((_, d)) => {
                let mut d = d.lock();
                if d.is_terminated() {
                    AckContext::Terminated {
                        last_ack_sent: d.last_ack_sent().is_some(),
                    }
                } else {
                    AckContext::Matched(d.handle_ack(&ack))
                }
            }
        };

        match rules::ack_verdict(context, pending.is_some()) {
            FilterVerdict::DeliverAck => {
                let Some((id, d)) = dialog else {
                    return;
                };
                if let Some(timer) = d.lock().timers.retransmit_2xx.take() {
                    self.timers.cancel(timer);
                }
                debug!(dialog = %id, "ACK for 2xx received");
                let branch = ack.branch().map(str::to_string);
                self.listener.on_request_event(RequestEvent {
                    request: ack,
                    source,
                    transaction: None,
                    dialog: Some(id),
                });
                if self.config.deliver_terminated_event_for_ack {
                    if let Some(branch) = branch {
                        self.listener.on_transaction_terminated(TransactionTerminatedEvent {
                            transaction: TransactionKey::new(branch, Method::Ack, true),
                        });
                    }
                }
            }
            FilterVerdict::AbsorbAck => {
                if let Some(transaction) = pending {
                    trace!(id = %transaction.key(), "ACK for non-2xx handed to its transaction");
                    if let Err(e) = transaction.process_request(ack).await {
                        trace!(error = %e, "INVITE transaction gone before ACK");
                    }
                }
            }
            FilterVerdict::ResendLastAck => {
                let resend = dialog.and_then(|(_, d)| {
                    let d = d.lock();
                    d.last_ack_sent().cloned().zip(d.remote_addr())
                });
                if let Some((last_ack, destination)) = resend {
                    debug!(%destination, "Resending last ACK for terminated dialog");
                    if let Err(e) = self.transport.send_message(Message::Request(last_ack), destination).await {
                        warn!(error = %e, "ACK resend failed");
                    }
                }
            }
            FilterVerdict::Drop(reason) => debug!(%source, reason, "ACK dropped"),
            other => warn!(?other, "Verdict does not apply to ACK"),
        }
    }

    async fn handle_cancel(&self, cancel: Request, source: SocketAddr, key: TransactionKey) {
        let invite_key = key.with_method(Method::Invite);
        let invite = self.registry.server_transaction(&invite_key);
        match rules::cancel_verdict(invite.as_ref().map(|t| t.state())) {
            FilterVerdict::Deliver => {
                let Some(invite) = invite else {
                    return;
                };
                let _dispatch = invite.lock_dispatch().await;
                let dialog = self
                    .registry
                    .dialog_of_transaction(&invite_key)
                    .and_then(|id| self.registry.dialog(&id).map(|d| (id, d)));
                self.deliver_request(cancel, source, dialog).await;
            }
            FilterVerdict::AutoOk => {
                let Some(transaction) = self.new_server_transaction(&cancel, source) else {
                    return;
                };
                debug!(id = %key, "CANCEL after final response, answering 200");
                let ok = SimpleResponseBuilder::response_from_request(&cancel, StatusCode::Ok).build();
                match ok {
                    Ok(ok) => {
                        if let Err(e) = transaction.send_response(ok).await {
                            warn!(id = %key, error = %e, "200 to CANCEL failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Could not build 200 to CANCEL"),
                }
            }
            FilterVerdict::Reject(rejection) => self.reject(cancel, source, &rejection).await,
            other => warn!(?other, "Verdict does not apply to CANCEL"),
        }
    }

    /// INVITE server transaction whose pending reliable provisional the
    /// PRACK acknowledges
    fn prack_transaction(&self, dialog: &SharedDialog, prack: &Request) -> Option<ServerTransaction> {
        let rack = prack.rack()?;
        let candidates = {
            let d = dialog.lock();
            [d.last_transaction().cloned(), Some(d.first_transaction().clone())]
        };
        candidates
            .into_iter()
            .flatten()
            .filter(|key| key.is_server && key.method == Method::Invite)
            .filter_map(|key| self.registry.server_transaction(&key))
            .find(|transaction| transaction.prack_matches(rack))
    }

    fn reinvite_facts(&self, dialog: &SharedDialog, cseq: u32) -> ReInviteFacts {
        let (last, ack_outstanding) = {
            let d = dialog.lock();
            (d.last_transaction().cloned(), d.has_unacknowledged_invite())
        };
        let mut facts = ReInviteFacts {
            ack_outstanding,
            ..Default::default()
        };
        let Some(last) = last.filter(|key| key.method == Method::Invite) else {
            return facts;
        };
        if last.is_server {
            if let Some(previous) = self.registry.server_transaction(&last) {
                let state = previous.state();
                facts.lower_invite_proceeding = state == TransactionState::Proceeding && previous.cseq() < cseq;
                facts.server_invite_completed = state == TransactionState::Completed;
            }
        } else if let Some(previous) = self.registry.client_transaction(&last) {
            facts.client_invite_pending = previous.state().is_pending();
        }
        facts
    }

    /// NOTIFY for a SUBSCRIBE (or REFER) whose dialog does not exist yet:
    /// the first NOTIFY claims the default dialog, a NOTIFY from another
    /// fork gets a dialog of its own
    async fn create_from_notify(&self, notify: Request, source: SocketAddr) {
        let subscription = notify
            .call_id()
            .zip(notify.to_tag())
            .and_then(|(call_id, tag)| self.registry.subscription(call_id, tag));
        let (Some(subscription), Some(remote_tag)) = (subscription, notify.from_tag()) else {
            let verdict = rules::notify_verdict(None, false, false, self.config.deliver_unsolicited_notify);
            self.apply_verdict(verdict, notify, source, None).await;
            return;
        };

        let dialog = match self.registry.claim_default_dialog(subscription.key(), remote_tag) {
            DefaultDialogClaim::Claimed(id) => self.registry.dialog(&id).map(|d| (id, d)),
            DefaultDialogClaim::Forked(base) => self.fork_dialog(&base),
            DefaultDialogClaim::Missing => None,
        };
        let Some((id, dialog)) = dialog else {
            let verdict = rules::notify_verdict(None, false, false, self.config.deliver_unsolicited_notify);
            self.apply_verdict(verdict, notify, source, None).await;
            return;
        };

        let change = {
            let mut d = dialog.lock();
            d.set_remote_addr(source);
            d.confirm_from_notify(&notify)
        };
        debug!(dialog = %id, "Dialog created from NOTIFY");
        self.dialog_state_changed(id, &dialog, change);
        self.deliver_request(notify, source, Some((id, dialog))).await;
    }

    /// New dialog sharing the local half of `base`, for another fork
    pub(crate) fn fork_dialog(&self, base: &DialogId) -> Option<(DialogId, SharedDialog)> {
        let forked = self.registry.dialog(base)?.lock().fork();
        let id = forked.id();
        let creator = forked.first_transaction().clone();
        let dialog = std::sync::Arc::new(parking_lot::Mutex::new(forked));
        self.registry.insert_dialog(id, dialog.clone());
        self.registry.add_created_dialog(&creator, id);
        debug!(dialog = %id, base = %base, "Forked dialog");
        Some((id, dialog))
    }

    async fn handle_response(&self, response: Response) {
        let Some(key) = TransactionKey::from_response(&response) else {
            debug!("Dropping response without Via or CSeq");
            return;
        };
        if let Some(transaction) = self.registry.client_transaction(&key) {
            if !transaction.is_terminated() {
                if let Err(e) = transaction.process_response(response).await {
                    trace!(id = %key, error = %e, "Transaction gone before response");
                }
                return;
            }
        }
        self.handle_stray_response(key, response).await;
    }

    /// Response for a transaction that is finished or unknown
    async fn handle_stray_response(&self, key: TransactionKey, response: Response) {
        let status = response.status();
        let is_invite = response.cseq().is_some_and(|c| c.method == Method::Invite);
        if !is_invite || !(status.is_success() || status.is_provisional()) {
            debug!(id = %key, status = status.as_u16(), "Dropping stray response");
            return;
        }

        let known = response
            .dialog_id(false)
            .and_then(|dialog_key| self.registry.dialog_by_key(&dialog_key));
        if let Some((id, dialog)) = known {
            let resend = {
                let d = dialog.lock();
                if d.is_acked_retransmission(&response) {
                    d.last_ack_sent().cloned().zip(d.remote_addr())
                } else {
                    None
                }
            };
            match resend {
                Some((ack, destination)) => {
                    trace!(dialog = %id, "Retransmitted 2xx, resending ACK");
                    if let Err(e) = self.transport.send_message(Message::Request(ack), destination).await {
                        warn!(dialog = %id, error = %e, "ACK resend failed");
                    }
                }
                None if status.is_success() => self.client_response(&key, response),
                None => trace!(dialog = %id, "Late provisional response ignored"),
            }
            return;
        }

        if self.config.max_fork_time == 0 || response.to_tag().is_none() {
            debug!(id = %key, "Dropping response for finished transaction");
            return;
        }
        let within_window = self
            .registry
            .default_dialog(&key)
            .and_then(|id| self.registry.dialog(&id))
            .is_some_and(|d| d.lock().created_at().elapsed() <= Duration::from_secs(self.config.max_fork_time));
        if within_window {
            debug!(id = %key, "Late forked response");
            self.client_response(&key, response);
        } else {
            debug!(id = %key, "Forked response outside the fork window");
        }
    }
}
