//! Dialog implementation for RFC 3261 SIP dialogs
//!
//! A [`Dialog`] is a plain synchronous state machine. The stack keeps each one
//! behind its own lock and feeds it the responses and requests of the
//! transactions that belong to it; timers and I/O stay outside.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sipflow_sip_core::prelude::*;
use sipflow_sip_core::dialog_key;
use tokio::time::Instant;
use tracing::debug;

use super::ack_gate::AckGate;
use super::dialog_id::DialogId;
use super::dialog_state::DialogState;
use crate::config::StackConfig;
use crate::errors::{DialogError, DialogResult};
use crate::timer::TimerId;
use crate::transaction::TransactionKey;

/// The subset of [`StackConfig`] a dialog consults
#[derive(Debug, Clone)]
pub struct DialogSettings {
    pub terminate_on_bye: bool,
    pub sequence_number_validation: bool,
    pub back_to_back_ua: bool,
    pub retransmission_detection_capacity: usize,
    /// Cap on 2xx retransmission
    pub ack_timeout: Duration,
    pub t1: Duration,
    pub t2: Duration,
}

impl From<&StackConfig> for DialogSettings {
    fn from(config: &StackConfig) -> Self {
        Self {
            terminate_on_bye: config.terminate_on_bye,
            sequence_number_validation: config.sequence_number_validation,
            back_to_back_ua: config.back_to_back_ua,
            retransmission_detection_capacity: config.retransmission_detection_capacity,
            ack_timeout: config.ack_timeout(),
            t1: config.timers.t1,
            t2: config.timers.t2,
        }
    }
}

impl Default for DialogSettings {
    fn default() -> Self {
        Self::from(&StackConfig::default())
    }
}

/// Result of comparing an in-dialog request's CSeq with the remote sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// Higher than anything seen so far
    Consumable,
    /// Equal to the last one seen
    Duplicate,
    /// Lower than the last one seen
    OutOfOrder,
}

/// Result of matching an ACK against the dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First ACK for the INVITE 2xx with this CSeq
    Accepted,
    /// This CSeq was already acknowledged
    Duplicate,
    /// No 2xx with this CSeq was sent
    NoMatch,
}

/// What the 2xx retransmission timer should do next
#[derive(Debug, Clone, PartialEq)]
pub enum RetransmitTick {
    Resend { response: Response, next: Duration },
    /// The ACK never came within the cap
    GiveUp,
    /// ACK seen or dialog gone
    Stop,
}

/// Timers owned by a dialog, cancelled by the stack
#[derive(Debug, Default, Clone)]
pub struct DialogTimers {
    pub retransmit_2xx: Option<TimerId>,
    pub early_timeout: Option<TimerId>,
    pub ack_wait: Option<TimerId>,
}

impl DialogTimers {
    pub fn take_all(&mut self) -> Vec<TimerId> {
        [
            self.retransmit_2xx.take(),
            self.early_timeout.take(),
            self.ack_wait.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Bounded FIFO of (status, CSeq, method) triples already delivered
#[derive(Debug, Clone)]
struct RetransmissionSet {
    capacity: usize,
    order: VecDeque<(u16, u32, Method)>,
    seen: HashSet<(u16, u32, Method)>,
}

impl RetransmissionSet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Records the triple; true if it was already present
    fn check_and_insert(&mut self, entry: (u16, u32, Method)) -> bool {
        if self.seen.contains(&entry) {
            return true;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(entry.clone());
        self.seen.insert(entry);
        false
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// A SIP dialog as defined in RFC 3261 §12
#[derive(Debug)]
pub struct Dialog {
    id: DialogId,
    state: DialogState,
    call_id: String,
    local_tag: Option<String>,
    remote_tag: Option<String>,
    local_party: Address,
    remote_party: Address,
    remote_target: Uri,
    local_seq: Option<u32>,
    remote_seq: Option<u32>,
    route_set: Vec<Address>,
    /// Route headers of the request that created the dialog
    original_routes: Vec<Address>,
    is_server: bool,
    /// Method of the dialog-creating request
    method: Method,
    event: Option<String>,
    first_transaction: TransactionKey,
    last_transaction: Option<TransactionKey>,
    early_branch: Option<String>,
    /// Highest CSeq of an INVITE for which a 2xx was sent or received
    invite_ok_cseq: Option<u32>,
    /// Highest CSeq acknowledged
    last_ack_cseq: Option<u32>,
    last_ack_sent: Option<Request>,
    /// Last 2xx to an INVITE sent by us, retransmitted until ACKed
    last_response: Option<Response>,
    pending_route_update: bool,
    retransmissions: RetransmissionSet,
    ack_gate: Arc<AckGate>,
    local_via: Option<Via>,
    local_contact: Option<Uri>,
    /// Where in-dialog responses and ACKs we originate are sent
    remote_addr: Option<SocketAddr>,
    retransmit_interval: Duration,
    retransmit_elapsed: Duration,
    created_at: Instant,
    settings: DialogSettings,
    pub(crate) timers: DialogTimers,
}

impl Dialog {
    /// Dialog for a dialog-creating request we are about to send (UAC side).
    /// It stays Null until a response with a To-tag arrives.
    pub fn new_client(request: &Request, transaction: TransactionKey, settings: DialogSettings) -> DialogResult<Self> {
        let call_id = request.require_call_id()?.to_string();
        let from = request
            .from()
            .ok_or_else(|| DialogError::protocol_error("Request has no From header"))?;
        let to = request
            .to()
            .ok_or_else(|| DialogError::protocol_error("Request has no To header"))?;
        let cseq = request.require_cseq()?.seq;
        let local_via = request
            .via()
            .map(|v| Via::new(v.transport.clone(), v.host.clone(), v.port));

        Ok(Self {
            id: DialogId::new(),
            state: DialogState::Null,
            call_id,
            local_tag: from.tag().map(str::to_string),
            remote_tag: None,
            local_party: from.clone(),
            remote_party: to.clone(),
            remote_target: request.uri.clone(),
            local_seq: Some(cseq),
            remote_seq: None,
            route_set: Vec::new(),
            original_routes: request.routes().into_iter().cloned().collect(),
            is_server: false,
            method: request.method.clone(),
            event: request.event().map(str::to_string),
            first_transaction: transaction,
            last_transaction: None,
            early_branch: request.branch().map(str::to_string),
            invite_ok_cseq: None,
            last_ack_cseq: None,
            last_ack_sent: None,
            last_response: None,
            pending_route_update: false,
            retransmissions: RetransmissionSet::new(settings.retransmission_detection_capacity),
            ack_gate: Arc::new(AckGate::new()),
            local_via,
            local_contact: request.contacts().first().map(|c| c.uri.clone()),
            remote_addr: None,
            retransmit_interval: settings.t1,
            retransmit_elapsed: Duration::ZERO,
            created_at: Instant::now(),
            settings,
            timers: DialogTimers::default(),
        })
    }

    /// Dialog for a dialog-creating request we received (UAS side). The local
    /// tag is assigned when the first tagged response is sent.
    pub fn new_server(request: &Request, transaction: TransactionKey, settings: DialogSettings) -> DialogResult<Self> {
        let call_id = request.require_call_id()?.to_string();
        let from = request
            .from()
            .ok_or_else(|| DialogError::protocol_error("Request has no From header"))?;
        let to = request
            .to()
            .ok_or_else(|| DialogError::protocol_error("Request has no To header"))?;
        let cseq = request.require_cseq()?.seq;
        let remote_target = request
            .contacts()
            .first()
            .map(|c| c.uri.clone())
            .unwrap_or_else(|| from.uri.clone());

        Ok(Self {
            id: DialogId::new(),
            state: DialogState::Null,
            call_id,
            local_tag: to.tag().map(str::to_string),
            remote_tag: from.tag().map(str::to_string),
            local_party: to.clone(),
            remote_party: from.clone(),
            remote_target,
            local_seq: None,
            remote_seq: Some(cseq),
            // UAS keeps Record-Route in order (RFC 3261 §12.1.1)
            route_set: request.record_routes().into_iter().cloned().collect(),
            original_routes: Vec::new(),
            is_server: true,
            method: request.method.clone(),
            event: request.event().map(str::to_string),
            first_transaction: transaction,
            last_transaction: None,
            early_branch: request.branch().map(str::to_string),
            invite_ok_cseq: None,
            last_ack_cseq: None,
            last_ack_sent: None,
            last_response: None,
            pending_route_update: false,
            retransmissions: RetransmissionSet::new(settings.retransmission_detection_capacity),
            ack_gate: Arc::new(AckGate::new()),
            local_via: None,
            local_contact: None,
            remote_addr: None,
            retransmit_interval: settings.t1,
            retransmit_elapsed: Duration::ZERO,
            created_at: Instant::now(),
            settings,
            timers: DialogTimers::default(),
        })
    }

    /// A sibling for a forked response: same local half, no remote tag yet
    pub fn fork(&self) -> Self {
        Self {
            id: DialogId::new(),
            state: DialogState::Null,
            call_id: self.call_id.clone(),
            local_tag: self.local_tag.clone(),
            remote_tag: None,
            local_party: self.local_party.clone(),
            remote_party: self.remote_party.clone(),
            remote_target: self.remote_target.clone(),
            local_seq: self.local_seq,
            remote_seq: None,
            route_set: Vec::new(),
            original_routes: self.original_routes.clone(),
            is_server: self.is_server,
            method: self.method.clone(),
            event: self.event.clone(),
            first_transaction: self.first_transaction.clone(),
            last_transaction: None,
            early_branch: self.early_branch.clone(),
            invite_ok_cseq: None,
            last_ack_cseq: None,
            last_ack_sent: None,
            last_response: None,
            pending_route_update: false,
            retransmissions: RetransmissionSet::new(self.settings.retransmission_detection_capacity),
            ack_gate: Arc::new(AckGate::new()),
            local_via: self.local_via.clone(),
            local_contact: self.local_contact.clone(),
            remote_addr: self.remote_addr,
            retransmit_interval: self.settings.t1,
            retransmit_elapsed: Duration::ZERO,
            created_at: self.created_at,
            settings: self.settings.clone(),
            timers: DialogTimers::default(),
        }
    }

    pub fn id(&self) -> DialogId {
        self.id
    }

    pub fn state(&self) -> DialogState {
        self.state
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn local_tag(&self) -> Option<&str> {
        self.local_tag.as_deref()
    }

    pub fn remote_tag(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    pub fn local_party(&self) -> &Address {
        &self.local_party
    }

    pub fn remote_party(&self) -> &Address {
        &self.remote_party
    }

    pub fn remote_target(&self) -> &Uri {
        &self.remote_target
    }

    pub fn route_set(&self) -> &[Address] {
        &self.route_set
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Event package of a SUBSCRIBE/REFER dialog
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    pub fn first_transaction(&self) -> &TransactionKey {
        &self.first_transaction
    }

    pub fn last_transaction(&self) -> Option<&TransactionKey> {
        self.last_transaction.as_ref()
    }

    pub fn set_last_transaction(&mut self, key: TransactionKey) {
        self.last_transaction = Some(key);
    }

    pub fn early_branch(&self) -> Option<&str> {
        self.early_branch.as_deref()
    }

    pub fn local_sequence_number(&self) -> Option<u32> {
        self.local_seq
    }

    pub fn remote_sequence_number(&self) -> Option<u32> {
        self.remote_seq
    }

    pub fn invite_ok_cseq(&self) -> Option<u32> {
        self.invite_ok_cseq
    }

    pub fn last_ack_cseq(&self) -> Option<u32> {
        self.last_ack_cseq
    }

    pub fn last_ack_sent(&self) -> Option<&Request> {
        self.last_ack_sent.as_ref()
    }

    pub fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    pub fn ack_gate(&self) -> Arc<AckGate> {
        self.ack_gate.clone()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_terminated(&self) -> bool {
        self.state.is_terminated()
    }

    /// `call-id:local-tag:remote-tag` once both tags are known
    pub fn key(&self) -> Option<String> {
        Some(dialog_key(&self.call_id, self.local_tag.as_deref()?, self.remote_tag.as_deref()?))
    }

    /// Via used for requests we originate inside the dialog
    pub fn set_local_via(&mut self, via: Via) {
        self.local_via = Some(via);
    }

    pub fn set_local_contact(&mut self, contact: Uri) {
        self.local_contact = Some(contact);
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    /// Allows one more Record-Route refresh after confirmation, e.g. for the
    /// NOTIFY that follows a 202 to SUBSCRIBE
    pub fn set_pending_route_update(&mut self) {
        self.pending_route_update = true;
    }

    pub fn has_unacknowledged_invite(&self) -> bool {
        match (self.invite_ok_cseq, self.last_ack_cseq) {
            (Some(ok), Some(acked)) => ok > acked,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn set_state(&mut self, state: DialogState) -> Option<DialogState> {
        if self.state == state {
            return None;
        }
        debug!(dialog = %self.id, "Dialog state {} -> {}", self.state, state);
        self.state = state;
        if state.is_terminated() {
            self.ack_gate.close();
        }
        Some(state)
    }

    /// Applies a response sent (UAS) or received (UAC) within this dialog.
    ///
    /// Returns the new state when it changed. A terminated dialog ignores
    /// everything.
    pub fn set_last_response(&mut self, transaction: &TransactionKey, response: &Response) -> Option<DialogState> {
        if self.state.is_terminated() {
            return None;
        }
        let status = response.status();
        if status == StatusCode::Trying {
            return None;
        }
        let Some(cseq) = response.cseq() else {
            return None;
        };
        let creating = cseq.method == self.method && self.method.creates_dialog();
        self.last_transaction = Some(transaction.clone());

        if status.is_provisional() {
            if !creating || response.to_tag().is_none() {
                return None;
            }
            return match self.state {
                DialogState::Null => {
                    self.adopt_response(response);
                    self.set_state(DialogState::Early)
                }
                DialogState::Early => {
                    // Fork adoption while still early
                    if response.to_tag() != self.tag_of_peer() {
                        self.adopt_response(response);
                    }
                    None
                }
                _ => None,
            };
        }

        if status.is_success() {
            if cseq.method == Method::Bye {
                return if self.settings.terminate_on_bye {
                    self.set_state(DialogState::Terminated)
                } else {
                    None
                };
            }
            if cseq.method == Method::Invite {
                self.invite_ok_cseq = Some(self.invite_ok_cseq.map_or(cseq.seq, |c| c.max(cseq.seq)));
                if self.is_server {
                    self.last_response = Some(response.clone());
                    self.retransmit_interval = self.settings.t1;
                    self.retransmit_elapsed = Duration::ZERO;
                }
            }
            if creating && self.state <= DialogState::Early {
                self.adopt_response(response);
                if self.is_server && self.settings.back_to_back_ua && self.method == Method::Invite {
                    self.ack_gate.try_acquire();
                }
                return self.set_state(DialogState::Confirmed);
            }
            if self.state == DialogState::Confirmed && cseq.method.is_target_refresh() && !self.is_server {
                if let Some(contact) = response.contacts().first() {
                    self.remote_target = contact.uri.clone();
                }
            }
            return None;
        }

        // 3xx-6xx: non-2xx to the dialog-creating request kills an unconfirmed dialog
        if creating && self.state <= DialogState::Early {
            return self.set_state(DialogState::Terminated);
        }
        None
    }

    fn tag_of_peer(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    /// Takes the peer tag, target and route set from a tagged response
    fn adopt_response(&mut self, response: &Response) {
        if self.is_server {
            if let Some(tag) = response.to_tag() {
                self.local_tag = Some(tag.to_string());
                self.local_party.set_tag(tag);
            }
            return;
        }
        if let Some(tag) = response.to_tag() {
            self.remote_tag = Some(tag.to_string());
            self.remote_party.set_tag(tag);
        }
        if let Some(contact) = response.contacts().first() {
            self.remote_target = contact.uri.clone();
        }
        self.add_route(response);
    }

    /// Rebuilds the route set from Record-Route: reversed on the UAC side, in
    /// order on the UAS side. Confirmed dialogs only accept this after
    /// [`set_pending_route_update`](Self::set_pending_route_update).
    pub fn add_route<M: HeaderAccess>(&mut self, message: &M) {
        if self.state.is_terminated() {
            return;
        }
        if self.state == DialogState::Confirmed && !self.pending_route_update {
            return;
        }
        let record_routes = message.record_routes();
        self.route_set = if self.is_server {
            record_routes.into_iter().cloned().collect()
        } else {
            record_routes.into_iter().rev().cloned().collect()
        };
        self.pending_route_update = false;
    }

    /// Confirms a subscriber dialog from the NOTIFY that created it
    /// (RFC 6665 §4.1.2.4). The route set is taken from the NOTIFY's
    /// Record-Route in order, as a UAS would.
    pub fn confirm_from_notify(&mut self, notify: &Request) -> Option<DialogState> {
        if self.state.is_terminated() || self.is_server {
            return None;
        }
        if let Some(tag) = notify.from_tag() {
            self.remote_tag = Some(tag.to_string());
            self.remote_party.set_tag(tag);
        }
        if let Some(contact) = notify.contacts().first() {
            self.remote_target = contact.uri.clone();
        }
        if self.state <= DialogState::Early {
            self.route_set = notify.record_routes().into_iter().cloned().collect();
        }
        if let Some(cseq) = notify.cseq() {
            self.remote_seq = Some(cseq.seq);
        }
        self.set_state(DialogState::Confirmed)
    }

    /// Applies an accepted in-dialog request: records its CSeq and, for
    /// target refresh requests, the new remote target
    pub fn apply_request(&mut self, request: &Request) {
        if self.state.is_terminated() || matches!(request.method, Method::Ack | Method::Cancel) {
            return;
        }
        if let Some(cseq) = request.cseq() {
            self.set_remote_sequence_number(cseq.seq);
        }
        if request.method.is_target_refresh() {
            if let Some(contact) = request.contacts().first() {
                self.remote_target = contact.uri.clone();
            }
        }
    }

    pub fn check_sequence(&self, cseq: u32) -> SeqCheck {
        match self.remote_seq {
            None => SeqCheck::Consumable,
            Some(last) if cseq > last => SeqCheck::Consumable,
            Some(last) if cseq == last => SeqCheck::Duplicate,
            Some(_) => SeqCheck::OutOfOrder,
        }
    }

    /// True if the request may be processed: ACK and CANCEL reuse the CSeq of
    /// the request they refer to, everything else must advance it
    pub fn is_request_consumable(&self, request: &Request) -> bool {
        if matches!(request.method, Method::Ack | Method::Cancel) || !self.settings.sequence_number_validation {
            return true;
        }
        request
            .cseq()
            .is_some_and(|c| self.check_sequence(c.seq) == SeqCheck::Consumable)
    }

    /// Records the CSeq of an accepted in-dialog request. Refused when
    /// validation is on and `cseq` does not advance the sequence.
    pub fn set_remote_sequence_number(&mut self, cseq: u32) -> bool {
        if self.settings.sequence_number_validation && self.check_sequence(cseq) != SeqCheck::Consumable {
            return false;
        }
        self.remote_seq = Some(cseq);
        true
    }

    /// Allocates the CSeq of the next request we send
    pub fn next_local_sequence_number(&mut self) -> u32 {
        let next = self.local_seq.map_or(1, |seq| seq.saturating_add(1));
        self.local_seq = Some(next);
        next
    }

    /// Matches an inbound ACK
    pub fn handle_ack(&mut self, ack: &Request) -> AckOutcome {
        match ack.cseq() {
            Some(cseq) => self.ack_received(cseq.seq),
            None => AckOutcome::NoMatch,
        }
    }

    /// Matches an ACK CSeq against the INVITE 2xx we sent. Only the first
    /// ACK for a CSeq changes anything; it stops 2xx retransmission and
    /// releases the ACK gate.
    pub fn ack_received(&mut self, cseq: u32) -> AckOutcome {
        if self.last_ack_cseq.is_some_and(|acked| cseq <= acked) {
            return AckOutcome::Duplicate;
        }
        if self.invite_ok_cseq != Some(cseq) {
            return AckOutcome::NoMatch;
        }
        self.last_ack_cseq = Some(cseq);
        self.last_response = None;
        self.ack_gate.release();
        if self.state == DialogState::Early || self.state == DialogState::Null {
            self.set_state(DialogState::Confirmed);
        }
        AckOutcome::Accepted
    }

    /// Remembers an ACK we sent for a 2xx so it can be resent for
    /// retransmissions of that 2xx
    pub fn ack_sent(&mut self, ack: &Request) {
        if let Some(cseq) = ack.cseq() {
            if self.last_ack_cseq.is_none_or(|acked| cseq.seq > acked) {
                self.last_ack_cseq = Some(cseq.seq);
            }
        }
        self.last_ack_sent = Some(ack.clone());
        self.ack_gate.release();
    }

    /// True when `response` is a 2xx we already ACKed
    pub fn is_acked_retransmission(&self, response: &Response) -> bool {
        response.status().is_success()
            && response
                .cseq()
                .is_some_and(|c| c.method == Method::Invite && self.last_ack_cseq == Some(c.seq))
    }

    /// ACK for the INVITE 2xx with CSeq `cseq`. Fails unless such a 2xx has
    /// been observed.
    pub fn create_ack(&self, cseq: u32) -> DialogResult<Request> {
        if self.state.is_terminated() {
            return Err(DialogError::invalid_state(format!("Dialog {} is terminated", self.id)));
        }
        match self.invite_ok_cseq {
            Some(ok) if cseq <= ok => {}
            _ => {
                return Err(DialogError::sequence_error(format!(
                    "No 2xx observed for INVITE with CSeq {}",
                    cseq
                )))
            }
        }
        let routes = if self.route_set.is_empty() {
            &self.original_routes
        } else {
            &self.route_set
        };
        self.build_request(Method::Ack, cseq, routes)
    }

    /// New in-dialog request with the next local CSeq. ACK and CANCEL are
    /// built elsewhere.
    pub fn create_request(&mut self, method: Method) -> DialogResult<Request> {
        if matches!(method, Method::Ack | Method::Cancel) {
            return Err(DialogError::protocol_error(format!(
                "{} is not created from the dialog",
                method
            )));
        }
        match self.state {
            DialogState::Early | DialogState::Confirmed => {}
            state => {
                return Err(DialogError::invalid_state(format!(
                    "Cannot send {} in a {} dialog",
                    method, state
                )))
            }
        }
        let seq = self.next_local_sequence_number();
        let mut request = self.build_request(method.clone(), seq, &self.route_set)?;
        if method.is_target_refresh() {
            if let Some(contact) = &self.local_contact {
                request.push_header(TypedHeader::Contact(Address::new(contact.clone())));
            }
        }
        if let Some(event) = self.event.as_ref().filter(|_| method == Method::Subscribe) {
            request.push_header(TypedHeader::Event(event.clone()));
        }
        Ok(request)
    }

    /// Request skeleton honouring loose and strict routing (RFC 3261 §12.2.1.1)
    fn build_request(&self, method: Method, seq: u32, routes: &[Address]) -> DialogResult<Request> {
        let via = self
            .local_via
            .as_ref()
            .ok_or_else(|| DialogError::protocol_error("Dialog has no local Via"))?;
        let mut from = self.local_party.clone();
        if let Some(tag) = &self.local_tag {
            from.set_tag(tag.clone());
        }
        let mut to = self.remote_party.clone();
        if let Some(tag) = &self.remote_tag {
            to.set_tag(tag.clone());
        }

        let (uri, route_headers): (Uri, Vec<Address>) = match routes.first() {
            Some(first) if !first.uri.is_loose_route() => {
                let mut uri = first.uri.clone();
                uri.params.clear();
                uri.headers = None;
                let mut rest: Vec<Address> = routes[1..].to_vec();
                rest.push(Address::new(self.remote_target.clone()));
                (uri, rest)
            }
            _ => (self.remote_target.clone(), routes.to_vec()),
        };

        let mut request = Request::new(method.clone(), uri)
            .with_header(TypedHeader::Via(via.clone().with_branch(generate_branch())))
            .with_header(TypedHeader::From(from))
            .with_header(TypedHeader::To(to))
            .with_header(TypedHeader::CallId(self.call_id.clone()))
            .with_header(TypedHeader::CSeq(CSeq::new(seq, method)))
            .with_header(TypedHeader::MaxForwards(70));
        for route in route_headers {
            request.push_header(TypedHeader::Route(route));
        }
        Ok(request)
    }

    /// Records a response in the fork retransmission set; true if the same
    /// (status, CSeq, method) was already delivered
    pub fn is_retransmission(&mut self, status: u16, cseq: u32, method: &Method) -> bool {
        self.retransmissions.check_and_insert((status, cseq, method.clone()))
    }

    pub fn retransmission_entries(&self) -> usize {
        self.retransmissions.len()
    }

    /// First 2xx retransmission delay after sending a 2xx to INVITE
    pub fn retransmit_interval(&self) -> Duration {
        self.retransmit_interval
    }

    /// Advances the 2xx retransmission schedule by one period
    pub fn on_retransmit_tick(&mut self) -> RetransmitTick {
        if self.state.is_terminated() {
            return RetransmitTick::Stop;
        }
        let Some(response) = self.last_response.clone() else {
            return RetransmitTick::Stop;
        };
        self.retransmit_elapsed += self.retransmit_interval;
        if self.retransmit_elapsed >= self.settings.ack_timeout {
            self.last_response = None;
            return RetransmitTick::GiveUp;
        }
        self.retransmit_interval = (self.retransmit_interval * 2).min(self.settings.t2);
        RetransmitTick::Resend {
            response,
            next: self.retransmit_interval,
        }
    }

    /// Moves to Terminated; returns false if it already was
    pub fn terminate(&mut self) -> bool {
        self.last_response = None;
        self.set_state(DialogState::Terminated).is_some()
    }
}
