//! Forked responses, subscriptions and ACK resends

mod common;

use std::time::Duration;

use common::*;
use sipflow_dialog_core::prelude::*;
use sipflow_sip_core::prelude::*;

fn remote_tag_and_state(h: &Harness, id: &DialogId) -> (String, DialogState) {
    let dialog = h.stack.get_dialog(id).unwrap();
    let d = dialog.lock();
    (d.remote_tag().unwrap_or_default().to_string(), d.state())
}

#[tokio::test(start_paused = true)]
async fn test_forked_provisionals_create_separate_dialogs() {
    let h = Harness::start(StackConfig::default());
    let tx = h
        .send(outbound(Method::Invite, "fork-1", "alice-tag", None, 1))
        .await;
    let invite = tx.original_request().unwrap();

    h.receive_response(peer_response(&invite, StatusCode::Ringing, Some("a")))
        .await;
    h.receive_response(peer_response(&invite, StatusCode::Ringing, Some("b")))
        .await;
    assert_eq!(h.stack.registry().dialog_count(), 2);
    let responses = h.listener.responses();
    assert_eq!(responses.len(), 2);
    let (first, second) = (responses[0].dialog.unwrap(), responses[1].dialog.unwrap());
    assert_ne!(first, second);
    assert_eq!(h.stack.dialog_state(&first), Some(DialogState::Early));
    assert_eq!(h.stack.dialog_state(&second), Some(DialogState::Early));
    // The second 180 is new for its own dialog
    assert!(!responses[1].is_retransmission);

    // Both forks answer; each dialog is confirmed on its own
    h.receive_response(peer_response(&invite, StatusCode::Ok, Some("b")))
        .await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    h.receive_response(peer_response(&invite, StatusCode::Ok, Some("a")))
        .await;
    assert_eq!(remote_tag_and_state(&h, &first), ("a".to_string(), DialogState::Confirmed));
    assert_eq!(remote_tag_and_state(&h, &second), ("b".to_string(), DialogState::Confirmed));
    assert_eq!(h.stack.registry().dialog_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failure_final_ends_every_early_fork() {
    let h = Harness::start(StackConfig::default());
    let tx = h
        .send(outbound(Method::Invite, "fork-486", "alice-tag", None, 1))
        .await;
    let invite = tx.original_request().unwrap();

    h.receive_response(peer_response(&invite, StatusCode::Ringing, Some("a")))
        .await;
    h.receive_response(peer_response(&invite, StatusCode::Ringing, Some("b")))
        .await;
    let responses = h.listener.responses();
    let (first, second) = (responses[0].dialog.unwrap(), responses[1].dialog.unwrap());

    // The final response names fork "a" only
    h.receive_response(peer_response(&invite, StatusCode::BusyHere, Some("a")))
        .await;
    assert_eq!(tx.state(), TransactionState::Completed);
    assert_eq!(h.stack.dialog_state(&first), Some(DialogState::Terminated));
    assert_eq!(h.stack.dialog_state(&second), Some(DialogState::Terminated));
    let ended = h.listener.terminated_dialogs();
    assert!(ended.contains(&first));
    assert!(ended.contains(&second));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_provisional_is_marked_retransmission() {
    let h = Harness::start(StackConfig::default());
    let tx = h
        .send(outbound(Method::Invite, "fork-2", "alice-tag", None, 1))
        .await;
    let invite = tx.original_request().unwrap();
    let ringing = peer_response(&invite, StatusCode::Ringing, Some("a"));

    h.receive_response(ringing.clone()).await;
    h.receive_response(ringing).await;
    let responses = h.listener.responses();
    assert_eq!(responses.len(), 2);
    assert!(!responses[0].is_retransmission);
    assert!(responses[1].is_retransmission);
    assert_eq!(h.stack.registry().dialog_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_fork_dropped_by_default() {
    let h = Harness::start(StackConfig::default());
    let tx = h
        .send(outbound(Method::Invite, "late-0", "alice-tag", None, 1))
        .await;
    let invite = tx.original_request().unwrap();

    h.receive_response(peer_response(&invite, StatusCode::Ok, Some("a")))
        .await;
    h.receive_response(peer_response(&invite, StatusCode::Ok, Some("c")))
        .await;
    assert_eq!(h.stack.registry().dialog_count(), 1);
    assert_eq!(h.listener.responses().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_fork_within_window_creates_dialog() {
    let h = Harness::start(StackConfig::default().with_max_fork_time(5));
    let tx = h
        .send(outbound(Method::Invite, "late-5", "alice-tag", None, 1))
        .await;
    let invite = tx.original_request().unwrap();

    h.receive_response(peer_response(&invite, StatusCode::Ok, Some("a")))
        .await;
    h.receive_response(peer_response(&invite, StatusCode::Ok, Some("c")))
        .await;
    assert_eq!(h.stack.registry().dialog_count(), 2);
    let late = h.listener.responses()[1].dialog.unwrap();
    let dialog = h.stack.get_dialog(&late).unwrap();
    assert_eq!(dialog.lock().remote_tag(), Some("c"));
    assert_eq!(dialog.lock().state(), DialogState::Confirmed);

    // Outside the window
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.receive_response(peer_response(&invite, StatusCode::Ok, Some("d")))
        .await;
    assert_eq!(h.stack.registry().dialog_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retransmitted_2xx_after_ack_resends_ack() {
    let h = Harness::start(StackConfig::default());
    let tx = h
        .send(outbound(Method::Invite, "resend-ack", "alice-tag", None, 1))
        .await;
    let invite = tx.original_request().unwrap();
    let ok = peer_response(&invite, StatusCode::Ok, Some("b"));
    h.receive_response(ok.clone()).await;

    let id = h.stack.dialog_of(tx.key()).unwrap();
    let ack = h.stack.create_ack(&id, 1).unwrap();
    h.stack.send_ack(&id, ack).await.unwrap();
    assert_eq!(h.transport.sent_requests(Method::Ack).len(), 1);

    h.receive_response(ok).await;
    let acks = h.transport.sent_requests(Method::Ack);
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0], acks[1]);
    // Not handed to the application again
    assert_eq!(h.listener.responses().len(), 1);

    // ACKing cancels the missing-ACK timer
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(h.listener.dialog_errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_ack_for_terminated_dialog_resends_last_ack() {
    let h = Harness::start(StackConfig::default());
    let tx = h
        .send(outbound(Method::Invite, "late-ack", "alice-tag", None, 1))
        .await;
    let invite = tx.original_request().unwrap();
    h.receive_response(peer_response(&invite, StatusCode::Ok, Some("b")))
        .await;
    let id = h.stack.dialog_of(tx.key()).unwrap();
    let ack = h.stack.create_ack(&id, 1).unwrap();
    h.stack.send_ack(&id, ack).await.unwrap();

    let bye = h.stack.create_request(&id, Method::Bye).unwrap();
    let bye_tx = h.stack.send_request_in_dialog(&id, bye).await.unwrap();
    h.settle().await;
    let bye = bye_tx.original_request().unwrap();
    h.receive_response(peer_response(&bye, StatusCode::Ok, None)).await;
    assert_eq!(h.stack.dialog_state(&id), Some(DialogState::Terminated));
    assert_eq!(h.listener.terminated_dialogs(), vec![id]);
    let requests_before = h.listener.requests().len();

    let mut late = inbound(Method::Ack, "late-ack", "b", Some("alice-tag"), 1);
    late.remove_header(&HeaderName::Contact);
    h.receive_request(late).await;

    let acks = h.transport.sent_requests(Method::Ack);
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0], acks[1]);
    assert_eq!(h.listener.requests().len(), requests_before);
    assert_eq!(h.stack.dialog_state(&id), Some(DialogState::Terminated));
}

#[tokio::test(start_paused = true)]
async fn test_notify_forks_create_subscription_dialogs() {
    let h = Harness::start(StackConfig::default());
    let tx = h
        .send(outbound(Method::Subscribe, "sub-1", "alice-tag", None, 1))
        .await;
    let default = h.stack.dialog_of(tx.key()).unwrap();

    let notify = |peer_tag: &str| {
        let mut notify = inbound(Method::Notify, "sub-1", peer_tag, Some("alice-tag"), 1);
        notify.push_header(TypedHeader::Event("presence".to_string()));
        notify
    };

    h.receive_request(notify("n1")).await;
    let first = h.listener.last_request(Method::Notify);
    assert_eq!(first.dialog, Some(default));
    assert_eq!(h.stack.dialog_state(&default), Some(DialogState::Confirmed));
    assert_eq!(h.stack.get_dialog(&default).unwrap().lock().remote_tag(), Some("n1"));

    h.receive_request(notify("n2")).await;
    let second = h.listener.last_request(Method::Notify);
    let forked = second.dialog.unwrap();
    assert_ne!(forked, default);
    assert_eq!(h.stack.registry().dialog_count(), 2);
    {
        let dialog = h.stack.get_dialog(&forked).unwrap();
        let d = dialog.lock();
        assert_eq!(d.state(), DialogState::Confirmed);
        assert_eq!(d.remote_tag(), Some("n2"));
        assert_eq!(d.local_tag(), Some("alice-tag"));
    }

    // The 200 to SUBSCRIBE from the first notifier lands on the claimed dialog
    let subscribe = tx.original_request().unwrap();
    h.receive_response(peer_response(&subscribe, StatusCode::Ok, Some("n1")))
        .await;
    assert_eq!(h.listener.responses()[0].dialog, Some(default));
    assert_eq!(h.stack.registry().dialog_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_notify_is_rejected() {
    let h = Harness::start(StackConfig::default());
    h.receive_request(inbound(Method::Notify, "nobody", "n1", Some("x"), 1))
        .await;
    assert_eq!(h.transport.sent_responses(481).len(), 1);
    assert!(h.listener.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_notify_delivered_when_enabled() {
    let h = Harness::start(StackConfig::default().with_deliver_unsolicited_notify(true));
    h.receive_request(inbound(Method::Notify, "nobody", "n1", Some("x"), 1))
        .await;
    assert!(h.transport.sent_responses(481).is_empty());
    assert_eq!(h.listener.requests_of(Method::Notify).len(), 1);
}
