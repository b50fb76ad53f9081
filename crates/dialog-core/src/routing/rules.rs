//! Per-method admission rules for inbound requests
//!
//! Every function here is pure: the stack gathers the facts (dialog state,
//! CSeq comparison, matching transactions) and the rule maps them to a
//! [`FilterVerdict`]. Rows follow RFC 3261 §12.2.2, §14.2 and §8.2.2.2,
//! RFC 3262 §3 and RFC 6665 §4.1.2.4.

use sipflow_sip_core::StatusCode;

use crate::dialog::{AckOutcome, SeqCheck};
use crate::transaction::TransactionState;

/// Retry-After sent with 500 responses to out-of-order requests
pub const RETRY_AFTER_SECS: u32 = 5;

/// A request answered by the stack itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub retry_after: Option<u32>,
    pub reason: Option<&'static str>,
}

impl Rejection {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            retry_after: None,
            reason: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u32) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }

    fn out_of_order() -> Self {
        Self::new(StatusCode::ServerInternalError)
            .with_retry_after(RETRY_AFTER_SECS)
            .with_reason("Request out of order")
    }
}

/// What happens to an inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Create a server transaction and hand the request to the listener
    Deliver,
    /// ACK for a 2xx accepted by the dialog; delivered without a transaction
    DeliverAck,
    /// ACK for a non-2xx final response; consumed by the INVITE server transaction
    AbsorbAck,
    /// ACK for a dialog that is already gone; resend the last ACK we sent
    ResendLastAck,
    /// CANCEL after the final response; answer 200 without dispatch
    AutoOk,
    /// NOTIFY for a pending SUBSCRIBE; create or claim its dialog
    CreateFromNotify,
    Drop(&'static str),
    Reject(Rejection),
}

/// Where an inbound ACK landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckContext {
    NoDialog,
    Terminated { last_ack_sent: bool },
    Matched(AckOutcome),
}

pub fn ack_verdict(context: AckContext, pending_ack: bool) -> FilterVerdict {
    match context {
        AckContext::Matched(AckOutcome::Accepted) => FilterVerdict::DeliverAck,
        AckContext::Matched(AckOutcome::Duplicate) => FilterVerdict::Drop("ACK already seen"),
        AckContext::Terminated { last_ack_sent: true } => FilterVerdict::ResendLastAck,
        AckContext::Terminated { last_ack_sent: false } if !pending_ack => {
            FilterVerdict::Drop("ACK for terminated dialog")
        }
        _ if pending_ack => FilterVerdict::AbsorbAck,
        _ => FilterVerdict::Drop("late or stray ACK"),
    }
}

/// `prack_matches` is only meaningful when a dialog was found
pub fn prack_verdict(
    dialog: Option<SeqCheck>,
    prack_matches: bool,
    automatic_dialog_support: bool,
) -> FilterVerdict {
    match dialog {
        Some(SeqCheck::Duplicate) | Some(SeqCheck::OutOfOrder) => FilterVerdict::Drop("PRACK out of sequence"),
        Some(SeqCheck::Consumable) if prack_matches => FilterVerdict::Deliver,
        Some(SeqCheck::Consumable) => FilterVerdict::Drop("PRACK does not match a pending reliable response"),
        None if automatic_dialog_support => {
            FilterVerdict::Reject(Rejection::new(StatusCode::CallOrTransactionDoesNotExist))
        }
        None => FilterVerdict::Drop("PRACK outside a dialog"),
    }
}

/// CSeq check shared by every in-dialog request
pub fn sequence_verdict(seq: SeqCheck, validation: bool) -> FilterVerdict {
    if !validation {
        return FilterVerdict::Deliver;
    }
    match seq {
        SeqCheck::Consumable => FilterVerdict::Deliver,
        SeqCheck::Duplicate => FilterVerdict::Drop("CSeq already consumed"),
        SeqCheck::OutOfOrder => FilterVerdict::Reject(Rejection::out_of_order()),
    }
}

/// A request with a To-tag whose dialog does not exist
pub fn no_dialog_verdict(automatic_dialog_support: bool) -> FilterVerdict {
    if automatic_dialog_support {
        FilterVerdict::Reject(Rejection::new(StatusCode::CallOrTransactionDoesNotExist))
    } else {
        FilterVerdict::Deliver
    }
}

/// `invite` is the state of the INVITE server transaction the CANCEL targets
pub fn cancel_verdict(invite: Option<TransactionState>) -> FilterVerdict {
    match invite {
        None => FilterVerdict::Reject(Rejection::new(StatusCode::CallOrTransactionDoesNotExist)),
        Some(TransactionState::Proceeding) | Some(TransactionState::Trying) => FilterVerdict::Deliver,
        Some(_) => FilterVerdict::AutoOk,
    }
}

/// Facts about a re-INVITE arriving on an existing dialog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReInviteFacts {
    /// A server INVITE with a lower CSeq has not been answered yet
    pub lower_invite_proceeding: bool,
    /// Our own INVITE on this dialog has no final response yet
    pub client_invite_pending: bool,
    /// A 2xx to an INVITE on this dialog has not been acknowledged
    pub ack_outstanding: bool,
    /// The previous server INVITE sent a non-2xx and waits for its ACK
    pub server_invite_completed: bool,
}

pub fn reinvite_verdict(facts: ReInviteFacts, seq: SeqCheck, validation: bool) -> FilterVerdict {
    if facts.lower_invite_proceeding {
        return FilterVerdict::Reject(
            Rejection::new(StatusCode::ServerInternalError).with_retry_after(RETRY_AFTER_SECS),
        );
    }
    if facts.client_invite_pending || facts.ack_outstanding || facts.server_invite_completed {
        return FilterVerdict::Reject(Rejection::new(StatusCode::RequestPending));
    }
    sequence_verdict(seq, validation)
}

pub fn notify_verdict(
    dialog: Option<SeqCheck>,
    validation: bool,
    pending_subscription: bool,
    deliver_unsolicited_notify: bool,
) -> FilterVerdict {
    match dialog {
        Some(seq) => sequence_verdict(seq, validation),
        None if pending_subscription => FilterVerdict::CreateFromNotify,
        None if deliver_unsolicited_notify => FilterVerdict::Deliver,
        None => FilterVerdict::Reject(
            Rejection::new(StatusCode::CallOrTransactionDoesNotExist).with_reason("Subscription does not exist"),
        ),
    }
}

/// RFC 3261 §8.2.2.2
pub fn merged_request_verdict(merged: bool, dialog_error_auto_handling: bool) -> Option<FilterVerdict> {
    (merged && dialog_error_auto_handling).then(|| FilterVerdict::Reject(Rejection::new(StatusCode::LoopDetected)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_rows() {
        assert_eq!(ack_verdict(AckContext::Matched(AckOutcome::Accepted), false), FilterVerdict::DeliverAck);
        assert!(matches!(
            ack_verdict(AckContext::Matched(AckOutcome::Duplicate), true),
            FilterVerdict::Drop(_)
        ));
        assert_eq!(ack_verdict(AckContext::Matched(AckOutcome::NoMatch), true), FilterVerdict::AbsorbAck);
        assert_eq!(ack_verdict(AckContext::NoDialog, true), FilterVerdict::AbsorbAck);
        assert!(matches!(ack_verdict(AckContext::NoDialog, false), FilterVerdict::Drop(_)));
        assert_eq!(
            ack_verdict(AckContext::Terminated { last_ack_sent: true }, false),
            FilterVerdict::ResendLastAck
        );
        assert!(matches!(
            ack_verdict(AckContext::Terminated { last_ack_sent: false }, false),
            FilterVerdict::Drop(_)
        ));
    }

    #[test]
    fn test_prack_rows() {
        assert_eq!(prack_verdict(Some(SeqCheck::Consumable), true, true), FilterVerdict::Deliver);
        assert!(matches!(prack_verdict(Some(SeqCheck::Consumable), false, true), FilterVerdict::Drop(_)));
        match prack_verdict(None, false, true) {
            FilterVerdict::Reject(r) => assert_eq!(r.status, StatusCode::CallOrTransactionDoesNotExist),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(prack_verdict(None, false, false), FilterVerdict::Drop(_)));
    }

    #[test]
    fn test_out_of_order_bye_gets_500_with_retry_after() {
        match sequence_verdict(SeqCheck::OutOfOrder, true) {
            FilterVerdict::Reject(r) => {
                assert_eq!(r.status, StatusCode::ServerInternalError);
                assert_eq!(r.retry_after, Some(RETRY_AFTER_SECS));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(sequence_verdict(SeqCheck::OutOfOrder, false), FilterVerdict::Deliver);
        assert!(matches!(sequence_verdict(SeqCheck::Duplicate, true), FilterVerdict::Drop(_)));
    }

    #[test]
    fn test_cancel_rows() {
        assert!(matches!(cancel_verdict(None), FilterVerdict::Reject(_)));
        assert_eq!(cancel_verdict(Some(TransactionState::Proceeding)), FilterVerdict::Deliver);
        assert_eq!(cancel_verdict(Some(TransactionState::Completed)), FilterVerdict::AutoOk);
        assert_eq!(cancel_verdict(Some(TransactionState::Terminated)), FilterVerdict::AutoOk);
    }

    #[test]
    fn test_reinvite_rows() {
        let pending = ReInviteFacts {
            lower_invite_proceeding: true,
            ..Default::default()
        };
        match reinvite_verdict(pending, SeqCheck::Consumable, true) {
            FilterVerdict::Reject(r) => {
                assert_eq!(r.status, StatusCode::ServerInternalError);
                assert!(r.retry_after.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        let glare = ReInviteFacts {
            client_invite_pending: true,
            ..Default::default()
        };
        match reinvite_verdict(glare, SeqCheck::Consumable, true) {
            FilterVerdict::Reject(r) => assert_eq!(r.status, StatusCode::RequestPending),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            reinvite_verdict(ReInviteFacts::default(), SeqCheck::Consumable, true),
            FilterVerdict::Deliver
        );
    }

    #[test]
    fn test_notify_rows() {
        assert_eq!(notify_verdict(None, true, true, false), FilterVerdict::CreateFromNotify);
        assert_eq!(notify_verdict(None, true, false, true), FilterVerdict::Deliver);
        match notify_verdict(None, true, false, false) {
            FilterVerdict::Reject(r) => assert_eq!(r.reason, Some("Subscription does not exist")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(notify_verdict(Some(SeqCheck::Consumable), true, true, false), FilterVerdict::Deliver);
    }

    #[test]
    fn test_merge_detection_requires_auto_handling() {
        assert!(merged_request_verdict(true, true).is_some());
        assert!(merged_request_verdict(true, false).is_none());
        assert!(merged_request_verdict(false, true).is_none());
    }
}
