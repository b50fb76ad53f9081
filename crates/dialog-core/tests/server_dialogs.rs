//! Requests arriving from the peer: the dialog filter and UAS dialogs

mod common;

use std::time::Duration;

use common::*;
use sipflow_dialog_core::prelude::*;
use sipflow_sip_core::prelude::*;

const LOCAL_TAG: &str = "uas-tag";

/// Receives an INVITE and answers it with a 200, returning the delivered
/// request event
async fn answered_invite(h: &Harness, call_id: &str, cseq: u32) -> RequestEvent {
    h.receive_request(inbound(Method::Invite, call_id, "peer-tag", None, cseq))
        .await;
    let event = h.listener.last_request(Method::Invite);
    let tx = event.transaction.clone().unwrap();
    h.stack
        .send_response(&tx, local_response(&event.request, StatusCode::Ok, LOCAL_TAG))
        .await
        .unwrap();
    h.settle().await;
    event
}

/// CANCEL the peer sends for its own `invite`
fn cancel_for(invite: &Request) -> Request {
    let mut cancel = invite.clone();
    let seq = invite.cseq().unwrap().seq;
    cancel.method = Method::Cancel;
    cancel.remove_header(&HeaderName::CSeq);
    cancel.remove_header(&HeaderName::Contact);
    cancel.push_header(TypedHeader::CSeq(CSeq::new(seq, Method::Cancel)));
    cancel
}

fn dialog_of(h: &Harness, event: &RequestEvent) -> DialogId {
    h.stack
        .dialog_of(event.transaction.as_ref().unwrap().key())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_ok_creates_confirmed_server_dialog() {
    let h = Harness::start(StackConfig::default());
    let event = answered_invite(&h, "uas-1", 1).await;
    assert!(event.dialog.is_none());

    let id = dialog_of(&h, &event);
    let dialog = h.stack.get_dialog(&id).unwrap();
    {
        let d = dialog.lock();
        assert_eq!(d.state(), DialogState::Confirmed);
        assert!(d.is_server());
        assert_eq!(d.local_tag(), Some(LOCAL_TAG));
        assert_eq!(d.remote_tag(), Some("peer-tag"));
        assert_eq!(d.remote_sequence_number(), Some(1));
    }
    assert_eq!(h.transport.sent_responses(200).len(), 1);
    assert_eq!(event.transaction.unwrap().state(), TransactionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_stale_bye_gets_500_with_retry_after() {
    let h = Harness::start(StackConfig::default());
    let event = answered_invite(&h, "stale-bye", 6).await;
    let id = dialog_of(&h, &event);

    h.receive_request(peer_ack(&event.request, LOCAL_TAG)).await;
    let acks = h.listener.requests_of(Method::Ack);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].dialog, Some(id));
    assert!(acks[0].transaction.is_none());

    h.receive_request(inbound(Method::Bye, "stale-bye", "peer-tag", Some(LOCAL_TAG), 5))
        .await;
    let rejected = h.transport.sent_responses_for(500, Method::Bye);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].retry_after(), Some(5));
    assert!(h.listener.requests_of(Method::Bye).is_empty());
    assert_eq!(h.stack.dialog_state(&id), Some(DialogState::Confirmed));

    // The next BYE in sequence goes through
    h.receive_request(inbound(Method::Bye, "stale-bye", "peer-tag", Some(LOCAL_TAG), 7))
        .await;
    let bye = h.listener.last_request(Method::Bye);
    assert_eq!(bye.dialog, Some(id));
    h.stack
        .send_response(
            bye.transaction.as_ref().unwrap(),
            local_response(&bye.request, StatusCode::Ok, LOCAL_TAG),
        )
        .await
        .unwrap();
    assert_eq!(h.stack.dialog_state(&id), Some(DialogState::Terminated));
}

#[tokio::test(start_paused = true)]
async fn test_request_for_unknown_dialog_gets_481() {
    let h = Harness::start(StackConfig::default());
    h.receive_request(inbound(Method::Info, "nowhere", "peer-tag", Some("gone"), 3))
        .await;
    assert_eq!(h.transport.sent_responses(481).len(), 1);
    assert!(h.listener.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_dialog_delivered_without_automatic_dialogs() {
    let h = Harness::start(StackConfig::default().with_automatic_dialog_support(false));
    h.receive_request(inbound(Method::Info, "nowhere", "peer-tag", Some("gone"), 3))
        .await;
    assert!(h.transport.sent_responses(481).is_empty());
    let event = h.listener.last_request(Method::Info);
    assert!(event.dialog.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_final_response_is_answered_by_stack() {
    let h = Harness::start(StackConfig::default());
    let event = answered_invite(&h, "late-cancel", 1).await;

    h.receive_request(cancel_for(&event.request)).await;

    assert_eq!(h.transport.sent_responses_for(200, Method::Cancel).len(), 1);
    assert!(h.listener.requests_of(Method::Cancel).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_of_pending_invite_is_delivered() {
    let h = Harness::start(StackConfig::default());
    h.receive_request(inbound(Method::Invite, "cancel-1", "peer-tag", None, 1))
        .await;
    let invite = h.listener.last_request(Method::Invite);

    h.receive_request(cancel_for(&invite.request)).await;

    assert_eq!(h.listener.requests_of(Method::Cancel).len(), 1);
    assert!(h.transport.sent_responses_for(200, Method::Cancel).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invite_without_answer_gets_trying() {
    let h = Harness::start(StackConfig::default());
    h.receive_request(inbound(Method::Invite, "trying-1", "peer-tag", None, 1))
        .await;
    assert!(h.transport.sent_responses(100).is_empty());
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.transport.sent_responses(100).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retransmitted_invite_is_absorbed() {
    let h = Harness::start(StackConfig::default());
    let invite = inbound(Method::Invite, "retrans-1", "peer-tag", None, 1);
    h.receive_request(invite.clone()).await;
    let event = h.listener.last_request(Method::Invite);
    let tx = event.transaction.unwrap();
    h.stack
        .send_response(&tx, local_response(&event.request, StatusCode::Ringing, LOCAL_TAG))
        .await
        .unwrap();

    h.receive_request(invite).await;
    assert_eq!(h.listener.requests_of(Method::Invite).len(), 1);
    // The transaction answers with its last provisional
    assert_eq!(h.transport.sent_responses(180).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_merged_request_is_rejected() {
    let h = Harness::start(StackConfig::default());
    h.receive_request(inbound(Method::Invite, "merged-1", "peer-tag", None, 1))
        .await;
    // Same From-tag, Call-ID and CSeq on a new branch
    h.receive_request(inbound(Method::Invite, "merged-1", "peer-tag", None, 1))
        .await;
    assert_eq!(h.listener.requests_of(Method::Invite).len(), 1);
    assert_eq!(h.transport.sent_responses(482).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_2xx_retransmitted_until_acked() {
    let h = Harness::start(StackConfig::default());
    let event = answered_invite(&h, "retransmit-2xx", 1).await;
    assert_eq!(h.transport.sent_responses(200).len(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.transport.sent_responses(200).len(), 2);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(h.transport.sent_responses(200).len(), 3);

    h.receive_request(peer_ack(&event.request, LOCAL_TAG)).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.transport.sent_responses(200).len(), 3);
    assert!(h.listener.dialog_errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_ack_is_not_delivered_twice() {
    let h = Harness::start(StackConfig::default());
    let event = answered_invite(&h, "dup-ack", 1).await;
    let ack = peer_ack(&event.request, LOCAL_TAG);
    h.receive_request(ack.clone()).await;
    h.receive_request(ack).await;
    assert_eq!(h.listener.requests_of(Method::Ack).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ack_terminated_event_when_enabled() {
    let h = Harness::start(StackConfig::default().with_deliver_terminated_event_for_ack(true));
    let event = answered_invite(&h, "ack-event", 1).await;
    let ack = peer_ack(&event.request, LOCAL_TAG);
    let branch = ack.branch().unwrap().to_string();
    h.receive_request(ack).await;

    let terminated = h.listener.transactions_terminated.lock().clone();
    assert!(terminated
        .iter()
        .any(|e| e.transaction.branch == branch && e.transaction.method == Method::Ack));
}

#[tokio::test(start_paused = true)]
async fn test_missing_ack_terminates_dialog() {
    let h = Harness::start(StackConfig::default());
    let event = answered_invite(&h, "never-acked", 1).await;
    let id = dialog_of(&h, &event);

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(h.listener.dialog_errors(), vec![DialogErrorKind::AckNotReceived]);
    assert!(h.listener.terminated_dialogs().contains(&id));
    let retransmitted = h.transport.sent_responses(200).len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.transport.sent_responses(200).len(), retransmitted);
}

#[tokio::test(start_paused = true)]
async fn test_missing_ack_only_reported_when_dialog_kept() {
    let h = Harness::start(StackConfig::default().with_ack_timeout_terminates_dialog(false));
    let event = answered_invite(&h, "kept", 1).await;
    let id = dialog_of(&h, &event);

    tokio::time::sleep(Duration::from_secs(40)).await;
    let timeouts = h.listener.timeouts.lock().clone();
    assert!(timeouts
        .iter()
        .any(|t| t.timeout == Timeout::Dialog && t.dialog == Some(id)));
    assert_eq!(h.stack.dialog_state(&id), Some(DialogState::Confirmed));
}

#[tokio::test(start_paused = true)]
async fn test_reinvite_before_ack_gets_491() {
    let h = Harness::start(StackConfig::default());
    answered_invite(&h, "glare-ack", 1).await;

    h.receive_request(inbound(Method::Invite, "glare-ack", "peer-tag", Some(LOCAL_TAG), 2))
        .await;
    assert_eq!(h.transport.sent_responses_for(491, Method::Invite).len(), 1);
    assert_eq!(h.listener.requests_of(Method::Invite).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reinvite_during_own_reinvite_gets_491() {
    let h = Harness::start(StackConfig::default());
    let event = answered_invite(&h, "glare", 1).await;
    let id = dialog_of(&h, &event);
    h.receive_request(peer_ack(&event.request, LOCAL_TAG)).await;

    let reinvite = h.stack.create_request(&id, Method::Invite).unwrap();
    assert_eq!(reinvite.to_tag(), Some("peer-tag"));
    assert_eq!(reinvite.from_tag(), Some(LOCAL_TAG));
    let ours = h.stack.send_request_in_dialog(&id, reinvite).await.unwrap();
    h.settle().await;
    assert_eq!(ours.state(), TransactionState::Calling);

    h.receive_request(inbound(Method::Invite, "glare", "peer-tag", Some(LOCAL_TAG), 2))
        .await;
    assert_eq!(h.transport.sent_responses_for(491, Method::Invite).len(), 1);
    assert_eq!(h.listener.requests_of(Method::Invite).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reinvite_while_lower_one_proceeds_gets_500() {
    let h = Harness::start(StackConfig::default());
    let event = answered_invite(&h, "overlap", 1).await;
    h.receive_request(peer_ack(&event.request, LOCAL_TAG)).await;

    h.receive_request(inbound(Method::Invite, "overlap", "peer-tag", Some(LOCAL_TAG), 2))
        .await;
    assert_eq!(h.listener.requests_of(Method::Invite).len(), 2);

    h.receive_request(inbound(Method::Invite, "overlap", "peer-tag", Some(LOCAL_TAG), 3))
        .await;
    let rejected = h.transport.sent_responses_for(500, Method::Invite);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].retry_after(), Some(5));
    assert_eq!(h.listener.requests_of(Method::Invite).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_headers_get_stateless_400() {
    let h = Harness::start(StackConfig::default());
    let mut request = inbound(Method::Options, "broken", "peer-tag", None, 1);
    request.remove_header(&HeaderName::CallId);
    h.receive_request(request).await;
    assert_eq!(h.transport.sent_responses(400).len(), 1);
    assert!(h.listener.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_b2bua_reinvite_waits_for_previous_ack() {
    let h = Harness::start(StackConfig::default().with_back_to_back_ua(true));
    let event = answered_invite(&h, "b2bua", 1).await;
    let id = dialog_of(&h, &event);

    let first = h.stack.create_request(&id, Method::Invite).unwrap();
    let first_cseq = first.cseq().unwrap().seq;
    let stack = h.stack.clone();
    let pending = tokio::spawn(async move { stack.send_request_in_dialog(&id, first).await });
    h.settle().await;
    assert!(h.transport.sent_requests(Method::Invite).is_empty());
    assert!(!pending.is_finished());

    h.receive_request(peer_ack(&event.request, LOCAL_TAG)).await;
    let first_tx = pending.await.unwrap().unwrap();
    assert_eq!(first_tx.state(), TransactionState::Calling);
    assert_eq!(h.transport.sent_requests(Method::Invite).len(), 1);

    // The next one queues behind our own ACK for the first re-INVITE
    let second = h.stack.create_request(&id, Method::Invite).unwrap();
    let stack = h.stack.clone();
    let pending = tokio::spawn(async move { stack.send_request_in_dialog(&id, second).await });
    h.settle().await;
    assert_eq!(h.transport.sent_requests(Method::Invite).len(), 1);

    let wire = h.wire_request(Method::Invite);
    h.receive_response(peer_response(&wire, StatusCode::Ok, None)).await;
    assert_eq!(h.transport.sent_requests(Method::Invite).len(), 1);
    let ack = h.stack.create_ack(&id, first_cseq).unwrap();
    h.stack.send_ack(&id, ack).await.unwrap();

    pending.await.unwrap().unwrap();
    assert_eq!(h.transport.sent_requests(Method::Invite).len(), 2);
    assert!(h.listener.dialog_errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_b2bua_reinvite_gives_up_without_ack() {
    let config = StackConfig::default()
        .with_back_to_back_ua(true)
        .with_reinvite_ack_wait(Duration::from_secs(2));
    let h = Harness::start(config);
    let event = answered_invite(&h, "b2bua-timeout", 1).await;
    let id = dialog_of(&h, &event);

    let reinvite = h.stack.create_request(&id, Method::Invite).unwrap();
    let err = h.stack.send_request_in_dialog(&id, reinvite).await.unwrap_err();
    assert!(matches!(err, DialogError::Concurrency { .. }));
    assert_eq!(h.listener.dialog_errors(), vec![DialogErrorKind::ReInviteTimeout]);
    assert!(h.transport.sent_requests(Method::Invite).is_empty());

    // Once the ACK arrives the dialog accepts re-INVITEs again
    h.receive_request(peer_ack(&event.request, LOCAL_TAG)).await;
    let reinvite = h.stack.create_request(&id, Method::Invite).unwrap();
    h.stack.send_request_in_dialog(&id, reinvite).await.unwrap();
    assert_eq!(h.transport.sent_requests(Method::Invite).len(), 1);
}

/// Receives an INVITE and answers it with a reliable 180, returning the
/// request event and the RSeq
async fn reliably_ringing(h: &Harness, call_id: &str) -> (RequestEvent, u32) {
    h.receive_request(inbound(Method::Invite, call_id, "peer-tag", None, 1))
        .await;
    let event = h.listener.last_request(Method::Invite);
    let tx = event.transaction.clone().unwrap();
    let rseq = h
        .stack
        .send_reliable_provisional(&tx, local_response(&event.request, StatusCode::Ringing, LOCAL_TAG))
        .await
        .unwrap();
    h.settle().await;
    (event, rseq)
}

fn prack_for(invite: &Request, rseq: u32, cseq: u32) -> Request {
    let mut prack = inbound(Method::Prack, invite.call_id().unwrap(), "peer-tag", Some(LOCAL_TAG), cseq);
    prack.push_header(TypedHeader::RAck(RAck::new(rseq, invite.cseq().unwrap().seq, Method::Invite)));
    prack
}

#[tokio::test(start_paused = true)]
async fn test_matching_prack_is_delivered_and_stops_retransmission() {
    let h = Harness::start(StackConfig::default());
    let (event, rseq) = reliably_ringing(&h, "prack-ok").await;
    let tx = event.transaction.clone().unwrap();
    let id = dialog_of(&h, &event);
    assert_eq!(h.stack.dialog_state(&id), Some(DialogState::Early));
    assert!(tx.has_pending_reliable());
    let ringing = h.transport.sent_responses(180);
    assert_eq!(ringing.len(), 1);
    assert!(ringing[0].requires("100rel"));

    h.receive_request(prack_for(&event.request, rseq, 2)).await;
    let delivered = h.listener.requests_of(Method::Prack);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].dialog, Some(id));
    assert!(!tx.has_pending_reliable());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.transport.sent_responses(180).len(), 1);
    assert!(h.listener.dialog_errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_prack_with_wrong_rack_is_dropped() {
    let h = Harness::start(StackConfig::default());
    let (event, rseq) = reliably_ringing(&h, "prack-mismatch").await;
    let tx = event.transaction.clone().unwrap();

    h.receive_request(prack_for(&event.request, rseq + 1, 2)).await;
    assert!(h.listener.requests_of(Method::Prack).is_empty());
    assert!(h.transport.sent_responses_for(481, Method::Prack).is_empty());
    assert!(tx.has_pending_reliable());

    // Still unacknowledged: the INVITE is rejected once retransmission gives up
    tokio::time::sleep(Duration::from_secs(70)).await;
    assert!(h.listener.dialog_errors().contains(&DialogErrorKind::PrackNotReceived));
    assert_eq!(h.transport.sent_responses_for(500, Method::Invite).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_route_naming_advertised_host_is_stripped() {
    let config = StackConfig::default().with_advertised_address("sip.example.com", Some(5060));
    let h = Harness::start(config);
    let mut options = inbound(Method::Options, "own-route", "peer-tag", None, 1);
    options.push_header(TypedHeader::Route(Address::new("sip:sip.example.com;lr".parse().unwrap())));
    options.push_header(TypedHeader::Route(Address::new("sip:p2.example.com;lr".parse().unwrap())));
    h.receive_request(options).await;

    let delivered = h.listener.last_request(Method::Options).request;
    let routes = delivered.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].uri.host, "p2.example.com");
}
