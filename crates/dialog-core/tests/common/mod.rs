//! Shared fixtures for the stack integration tests
//!
//! Tests run on a paused clock: every `sleep` lets all ready tasks run to
//! quiescence before virtual time moves, so [`Harness::settle`] is enough to
//! flush a message through the transport loop, the transactions and the
//! event loop.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sipflow_dialog_core::prelude::*;
use sipflow_sip_core::prelude::*;
use sipflow_sip_transport::{Transport, TransportEvent, TransportKind};

pub fn local_addr() -> SocketAddr {
    "127.0.0.1:5060".parse().unwrap()
}

pub fn peer_addr() -> SocketAddr {
    "192.0.2.20:5060".parse().unwrap()
}

/// Transport that records what the stack sends instead of putting it on a wire
#[derive(Debug)]
pub struct RecordingTransport {
    addr: SocketAddr,
    kind: TransportKind,
    sent: Mutex<Vec<(Message, SocketAddr)>>,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            addr: local_addr(),
            kind,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<(Message, SocketAddr)> {
        self.sent.lock().clone()
    }

    pub fn sent_requests(&self, method: Method) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(message, _)| match message {
                Message::Request(request) if request.method == method => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_responses(&self, status: u16) -> Vec<Response> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(message, _)| match message {
                Message::Response(response) if response.status_code() == status => Some(response.clone()),
                _ => None,
            })
            .collect()
    }

    /// Responses with `status` answering a request of `method`
    pub fn sent_responses_for(&self, status: u16, method: Method) -> Vec<Response> {
        self.sent_responses(status)
            .into_iter()
            .filter(|r| r.cseq().is_some_and(|c| c.method == method))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn local_addr(&self) -> sipflow_sip_transport::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send_bytes(&self, bytes: Bytes, destination: SocketAddr) -> sipflow_sip_transport::Result<()> {
        if self.is_closed() {
            return Err(sipflow_sip_transport::Error::TransportClosed);
        }
        let message = parse_message(&bytes)?;
        self.sent.lock().push((message, destination));
        Ok(())
    }

    async fn close(&self) -> sipflow_sip_transport::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Listener keeping every event it receives
#[derive(Debug, Default)]
pub struct CollectingListener {
    pub requests: Mutex<Vec<RequestEvent>>,
    pub responses: Mutex<Vec<ResponseEvent>>,
    pub timeouts: Mutex<Vec<TimeoutEvent>>,
    pub dialog_errors: Mutex<Vec<DialogErrorEvent>>,
    pub transactions_terminated: Mutex<Vec<TransactionTerminatedEvent>>,
    pub dialogs_terminated: Mutex<Vec<DialogTerminatedEvent>>,
    pub transport_errors: Mutex<Vec<TransportErrorEvent>>,
}

impl CollectingListener {
    pub fn requests(&self) -> Vec<RequestEvent> {
        self.requests.lock().clone()
    }

    pub fn requests_of(&self, method: Method) -> Vec<RequestEvent> {
        self.requests
            .lock()
            .iter()
            .filter(|e| e.request.method == method)
            .cloned()
            .collect()
    }

    pub fn last_request(&self, method: Method) -> RequestEvent {
        self.requests_of(method).pop().expect("no request delivered")
    }

    pub fn responses(&self) -> Vec<ResponseEvent> {
        self.responses.lock().clone()
    }

    pub fn dialog_errors(&self) -> Vec<DialogErrorKind> {
        self.dialog_errors.lock().iter().map(|e| e.error).collect()
    }

    pub fn terminated_dialogs(&self) -> Vec<DialogId> {
        self.dialogs_terminated.lock().iter().map(|e| e.dialog).collect()
    }
}

impl SipListener for CollectingListener {
    fn on_request_event(&self, event: RequestEvent) {
        self.requests.lock().push(event);
    }

    fn on_response_event(&self, event: ResponseEvent) {
        self.responses.lock().push(event);
    }

    fn on_timeout_event(&self, event: TimeoutEvent) {
        self.timeouts.lock().push(event);
    }

    fn on_dialog_error_event(&self, event: DialogErrorEvent) {
        self.dialog_errors.lock().push(event);
    }

    fn on_transaction_terminated(&self, event: TransactionTerminatedEvent) {
        self.transactions_terminated.lock().push(event);
    }

    fn on_dialog_terminated(&self, event: DialogTerminatedEvent) {
        self.dialogs_terminated.lock().push(event);
    }

    fn on_transport_error(&self, event: TransportErrorEvent) {
        self.transport_errors.lock().push(event);
    }
}

/// A started stack wired to a recording transport and a collecting listener
pub struct Harness {
    pub stack: SipStack,
    pub transport: Arc<RecordingTransport>,
    pub listener: Arc<CollectingListener>,
    inbound: mpsc::Sender<TransportEvent>,
}

impl Harness {
    pub fn start(config: StackConfig) -> Self {
        Self::start_with(config, TransportKind::Udp)
    }

    pub fn start_with(config: StackConfig, kind: TransportKind) -> Self {
        let transport = Arc::new(RecordingTransport::new(kind));
        let listener = Arc::new(CollectingListener::default());
        let stack = SipStack::new(config, transport.clone(), listener.clone()).unwrap();
        let (inbound, events) = mpsc::channel(64);
        stack.start(events).unwrap();
        Self {
            stack,
            transport,
            listener,
            inbound,
        }
    }

    /// Delivers a message from the peer and waits until the stack is idle
    pub async fn receive(&self, message: Message) {
        self.inbound
            .send(TransportEvent::MessageReceived {
                message,
                source: peer_addr(),
                destination: local_addr(),
                kind: self.transport.kind(),
            })
            .await
            .unwrap();
        self.settle().await;
    }

    pub async fn receive_request(&self, request: Request) {
        self.receive(Message::Request(request)).await;
    }

    pub async fn receive_response(&self, response: Response) {
        self.receive(Message::Response(response)).await;
    }

    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// Sends `request` through a fresh client transaction to the peer
    pub async fn send(&self, request: Request) -> ClientTransaction {
        let transaction = self.stack.create_client_transaction(request, peer_addr()).unwrap();
        self.stack.send_request(&transaction).await.unwrap();
        self.settle().await;
        transaction
    }

    /// The request as it went out on the wire (with its generated branch)
    pub fn wire_request(&self, method: Method) -> Request {
        self.transport.sent_requests(method).pop().expect("request not sent")
    }
}

/// Request the stack originates towards the peer
pub fn outbound(method: Method, call_id: &str, local_tag: &str, remote_tag: Option<&str>, cseq: u32) -> Request {
    let mut builder = SimpleRequestBuilder::new(method.clone(), "sip:bob@192.0.2.20:5060")
        .from("Alice", "sip:alice@example.com", Some(local_tag))
        .to("Bob", "sip:bob@example.com", remote_tag)
        .call_id(call_id)
        .cseq(cseq)
        .via("127.0.0.1:5060", "UDP", None)
        .contact("sip:alice@127.0.0.1:5060");
    if matches!(method, Method::Subscribe) {
        builder = builder.event("presence");
    }
    builder.build().unwrap()
}

/// Request the peer sends to the stack
pub fn inbound(method: Method, call_id: &str, peer_tag: &str, local_tag: Option<&str>, cseq: u32) -> Request {
    SimpleRequestBuilder::new(method, "sip:alice@127.0.0.1:5060")
        .from("Bob", "sip:bob@example.com", Some(peer_tag))
        .to("Alice", "sip:alice@example.com", local_tag)
        .call_id(call_id)
        .cseq(cseq)
        .via("192.0.2.20:5060", "UDP", Some(&generate_branch()))
        .contact("sip:bob@192.0.2.20:5060")
        .build()
        .unwrap()
}

/// The peer's response to a request the stack sent
pub fn peer_response(request: &Request, status: StatusCode, to_tag: Option<&str>) -> Response {
    let mut builder = SimpleResponseBuilder::response_from_request(request, status).contact("sip:bob@192.0.2.20:5060");
    if let Some(tag) = to_tag {
        builder = builder.to_tag(tag);
    }
    builder.build().unwrap()
}

/// The application's response to a request it received
pub fn local_response(request: &Request, status: StatusCode, to_tag: &str) -> Response {
    SimpleResponseBuilder::response_from_request(request, status)
        .to_tag(to_tag)
        .contact("sip:alice@127.0.0.1:5060")
        .build()
        .unwrap()
}

/// ACK the peer sends for a 2xx it received from the stack
pub fn peer_ack(invite: &Request, local_tag: &str) -> Request {
    let peer_tag = invite.from_tag().unwrap();
    let call_id = invite.call_id().unwrap();
    let cseq = invite.cseq().unwrap().seq;
    let mut ack = inbound(Method::Ack, call_id, peer_tag, Some(local_tag), cseq);
    ack.remove_header(&HeaderName::Contact);
    ack
}
