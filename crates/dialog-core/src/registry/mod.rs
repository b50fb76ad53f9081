//! # Stack registries
//!
//! The only process-wide mutable maps of the stack. Transactions and dialogs
//! reference each other through the keys stored here, never directly, so
//! dropping an entry is all it takes to release an entity.
//!
//! | Table | Key | Value |
//! |---|---|---|
//! | client / server transactions | [`TransactionKey`] | transaction handle |
//! | merge table | From-tag, Call-ID, CSeq | server transaction key |
//! | pending ACKs | INVITE server key | transaction awaiting ACK for its non-2xx |
//! | dialogs | [`DialogId`] | [`SharedDialog`] |
//! | dialog keys | `call-id:local-tag:remote-tag` | [`DialogId`] |
//! | default dialogs | client transaction key | dialog created with the request |
//! | created dialogs | client transaction key | default dialog and its forks |

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use sipflow_sip_core::prelude::*;
use tracing::trace;

use crate::dialog::{DialogId, SharedDialog};
use crate::transaction::{ClientTransaction, ServerTransaction, TransactionKey};

/// RFC 3261 §8.2.2.2 identity of a request without a To-tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    pub from_tag: String,
    pub call_id: String,
    pub cseq: u32,
    pub method: Method,
}

impl MergeKey {
    pub fn from_request(request: &Request) -> Option<Self> {
        let cseq = request.cseq()?;
        Some(Self {
            from_tag: request.from_tag()?.to_string(),
            call_id: request.call_id()?.to_string(),
            cseq: cseq.seq,
            method: cseq.method.clone(),
        })
    }
}

/// Outcome of [`Registry::claim_default_dialog`]
#[derive(Debug, Clone)]
pub enum DefaultDialogClaim {
    /// The default dialog belongs to this remote tag (first claim or same tag)
    Claimed(DialogId),
    /// Another remote tag already owns it; fork from this dialog
    Forked(DialogId),
    Missing,
}

#[derive(Debug)]
struct DefaultDialogSlot {
    dialog: DialogId,
    remote_tag: Option<String>,
}

#[derive(Debug, Default)]
pub struct Registry {
    client_transactions: DashMap<TransactionKey, ClientTransaction>,
    server_transactions: DashMap<TransactionKey, ServerTransaction>,
    merge_table: DashMap<MergeKey, TransactionKey>,
    merge_keys: DashMap<TransactionKey, MergeKey>,
    pending_acks: DashMap<TransactionKey, ServerTransaction>,
    dialogs: DashMap<DialogId, SharedDialog>,
    dialog_keys: DashMap<String, DialogId>,
    default_dialogs: DashMap<TransactionKey, Arc<Mutex<DefaultDialogSlot>>>,
    transaction_dialogs: DashMap<TransactionKey, DialogId>,
    /// Default dialog of a client transaction plus every fork of it
    created_dialogs: DashMap<TransactionKey, Vec<DialogId>>,
    /// `call-id:local-tag` of SUBSCRIBE/REFER requests, for NOTIFY matching
    subscriptions: DashMap<String, TransactionKey>,
}

fn subscription_key(call_id: &str, local_tag: &str) -> String {
    format!("{}:{}", call_id, local_tag).to_ascii_lowercase()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // Transactions

    pub fn insert_client_transaction(&self, transaction: ClientTransaction) {
        if let Ok(request) = transaction.original_request() {
            if matches!(request.method, Method::Subscribe | Method::Refer) {
                if let (Some(call_id), Some(tag)) = (request.call_id(), request.from_tag()) {
                    self.subscriptions
                        .insert(subscription_key(call_id, tag), transaction.key().clone());
                }
            }
        }
        self.client_transactions
            .insert(transaction.key().clone(), transaction);
    }

    pub fn client_transaction(&self, key: &TransactionKey) -> Option<ClientTransaction> {
        self.client_transactions.get(key).map(|t| t.clone())
    }

    /// Registers a server transaction; requests without a To-tag also enter
    /// the merge table
    pub fn insert_server_transaction(&self, transaction: ServerTransaction, request: &Request) {
        let key = transaction.key().clone();
        if request.to_tag().is_none() {
            if let Some(merge_key) = MergeKey::from_request(request) {
                self.merge_table.insert(merge_key.clone(), key.clone());
                self.merge_keys.insert(key.clone(), merge_key);
            }
        }
        self.server_transactions.insert(key, transaction);
    }

    pub fn server_transaction(&self, key: &TransactionKey) -> Option<ServerTransaction> {
        self.server_transactions.get(key).map(|t| t.clone())
    }

    /// True when another transaction already carries this request's
    /// From-tag, Call-ID and CSeq (a merged request)
    pub fn is_merged_request(&self, request: &Request, key: &TransactionKey) -> bool {
        if request.to_tag().is_some() {
            return false;
        }
        MergeKey::from_request(request)
            .and_then(|merge_key| self.merge_table.get(&merge_key).map(|k| k.clone()))
            .is_some_and(|existing| &existing != key)
    }

    pub fn insert_pending_ack(&self, transaction: ServerTransaction) {
        self.pending_acks.insert(transaction.key().clone(), transaction);
    }

    pub fn pending_ack(&self, key: &TransactionKey) -> Option<ServerTransaction> {
        self.pending_acks.get(key).map(|t| t.clone())
    }

    pub fn remove_pending_ack(&self, key: &TransactionKey) {
        self.pending_acks.remove(key);
    }

    /// Pending SUBSCRIBE or REFER whose From-tag is `local_tag`
    pub fn subscription(&self, call_id: &str, local_tag: &str) -> Option<ClientTransaction> {
        let key = self.subscriptions.get(&subscription_key(call_id, local_tag))?.clone();
        self.client_transaction(&key)
    }

    /// Drops a transaction and everything indexed by it
    pub fn remove_transaction(&self, key: &TransactionKey) {
        trace!(id = %key, "Removing transaction from registry");
        if let Some((_, tx)) = self.client_transactions.remove(key) {
            if let Ok(request) = tx.original_request() {
                if let (Some(call_id), Some(tag)) = (request.call_id(), request.from_tag()) {
                    self.subscriptions
                        .remove_if(&subscription_key(call_id, tag), |_, k| k == key);
                }
            }
        }
        self.server_transactions.remove(key);
        if let Some((_, merge_key)) = self.merge_keys.remove(key) {
            self.merge_table.remove_if(&merge_key, |_, k| k == key);
        }
        self.pending_acks.remove(key);
        self.default_dialogs.remove(key);
        self.transaction_dialogs.remove(key);
        self.created_dialogs.remove(key);
    }

    pub fn transaction_count(&self) -> usize {
        self.client_transactions.len() + self.server_transactions.len()
    }

    // Dialogs

    pub fn insert_dialog(&self, id: DialogId, dialog: SharedDialog) {
        self.dialogs.insert(id, dialog);
    }

    pub fn dialog(&self, id: &DialogId) -> Option<SharedDialog> {
        self.dialogs.get(id).map(|d| d.clone())
    }

    pub fn dialog_by_key(&self, key: &str) -> Option<(DialogId, SharedDialog)> {
        let id = *self.dialog_keys.get(&key.to_ascii_lowercase())?;
        self.dialog(&id).map(|d| (id, d))
    }

    /// Indexes `id` under `key`. If another dialog got there first its id is
    /// returned and the index is left alone.
    pub fn register_dialog_key(&self, key: &str, id: DialogId) -> DialogId {
        match self.dialog_keys.entry(key.to_ascii_lowercase()) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(slot) => {
                slot.insert(id);
                id
            }
        }
    }

    pub fn remove_dialog(&self, id: &DialogId) -> Option<SharedDialog> {
        let (_, dialog) = self.dialogs.remove(id)?;
        if let Some(key) = dialog.lock().key() {
            self.dialog_keys.remove_if(&key, |_, existing| existing == id);
        }
        self.transaction_dialogs.retain(|_, d| d != id);
        for mut created in self.created_dialogs.iter_mut() {
            created.retain(|d| d != id);
        }
        Some(dialog)
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    /// Remembers the dialog created together with a client transaction
    pub fn set_default_dialog(&self, transaction: &TransactionKey, dialog: DialogId) {
        self.add_created_dialog(transaction, dialog);
        self.default_dialogs.insert(
            transaction.clone(),
            Arc::new(Mutex::new(DefaultDialogSlot {
                dialog,
                remote_tag: None,
            })),
        );
    }

    pub fn default_dialog(&self, transaction: &TransactionKey) -> Option<DialogId> {
        self.default_dialogs.get(transaction).map(|slot| slot.lock().dialog)
    }

    /// Binds the default dialog of `transaction` to `remote_tag`.
    ///
    /// The first caller to find the slot unclaimed wins; later callers with the
    /// same tag get the same dialog, callers with another tag are told to fork.
    pub fn claim_default_dialog(&self, transaction: &TransactionKey, remote_tag: &str) -> DefaultDialogClaim {
        let Some(slot) = self.default_dialogs.get(transaction).map(|s| s.clone()) else {
            return DefaultDialogClaim::Missing;
        };
        let mut slot = slot.lock();
        match &slot.remote_tag {
            None => {
                slot.remote_tag = Some(remote_tag.to_string());
                DefaultDialogClaim::Claimed(slot.dialog)
            }
            Some(tag) if tag.eq_ignore_ascii_case(remote_tag) => DefaultDialogClaim::Claimed(slot.dialog),
            Some(_) => DefaultDialogClaim::Forked(slot.dialog),
        }
    }

    /// Records a dialog (default or forked) created by a client transaction
    pub fn add_created_dialog(&self, transaction: &TransactionKey, dialog: DialogId) {
        let mut created = self.created_dialogs.entry(transaction.clone()).or_default();
        if !created.contains(&dialog) {
            created.push(dialog);
        }
    }

    pub fn dialogs_created_by(&self, transaction: &TransactionKey) -> Vec<DialogId> {
        self.created_dialogs
            .get(transaction)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn link_transaction(&self, transaction: &TransactionKey, dialog: DialogId) {
        self.transaction_dialogs.insert(transaction.clone(), dialog);
    }

    pub fn dialog_of_transaction(&self, transaction: &TransactionKey) -> Option<DialogId> {
        self.transaction_dialogs.get(transaction).map(|d| *d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::{Dialog, DialogSettings};

    #[test]
    fn test_default_dialog_claim_and_fork() {
        let registry = Registry::new();
        let tx = TransactionKey::new("z9hG4bKsub", Method::Subscribe, false);
        let dialog = DialogId::new();
        registry.set_default_dialog(&tx, dialog);

        match registry.claim_default_dialog(&tx, "a") {
            DefaultDialogClaim::Claimed(id) => assert_eq!(id, dialog),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(registry.claim_default_dialog(&tx, "A"), DefaultDialogClaim::Claimed(_)));
        match registry.claim_default_dialog(&tx, "b") {
            DefaultDialogClaim::Forked(base) => assert_eq!(base, dialog),
            other => panic!("unexpected {:?}", other),
        }
        registry.remove_transaction(&tx);
        assert!(matches!(registry.claim_default_dialog(&tx, "a"), DefaultDialogClaim::Missing));
    }

    #[test]
    fn test_created_dialogs_follow_removals() {
        let registry = Registry::new();
        let tx = TransactionKey::new("z9hG4bKinv", Method::Invite, false);
        let default = DialogId::new();
        let fork = DialogId::new();
        registry.set_default_dialog(&tx, default);
        registry.add_created_dialog(&tx, fork);
        registry.add_created_dialog(&tx, fork);
        assert_eq!(registry.dialogs_created_by(&tx), vec![default, fork]);

        let invite = SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .from("", "sip:alice@example.com", Some("ft"))
            .to("", "sip:bob@example.com", None)
            .call_id("created-1")
            .cseq(1)
            .via("10.0.0.1:5060", "UDP", Some("z9hG4bKinv"))
            .build()
            .unwrap();
        let dialog = Dialog::new_client(&invite, tx.clone(), DialogSettings::default()).unwrap();
        registry.insert_dialog(fork, Arc::new(Mutex::new(dialog)));
        registry.remove_dialog(&fork);
        assert_eq!(registry.dialogs_created_by(&tx), vec![default]);

        registry.remove_transaction(&tx);
        assert!(registry.dialogs_created_by(&tx).is_empty());
    }

    #[test]
    fn test_dialog_key_first_registration_wins() {
        let registry = Registry::new();
        let first = DialogId::new();
        let second = DialogId::new();
        assert_eq!(registry.register_dialog_key("Call:A:B", first), first);
        assert_eq!(registry.register_dialog_key("call:a:b", second), first);
    }

    #[test]
    fn test_merge_key_ignores_tagged_requests() {
        let request = SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .from("", "sip:alice@example.com", Some("ft"))
            .to("", "sip:bob@example.com", Some("tt"))
            .call_id("merge-1")
            .cseq(1)
            .via("10.0.0.1:5060", "UDP", Some("z9hG4bKm1"))
            .build()
            .unwrap();
        let registry = Registry::new();
        let key = TransactionKey::new("z9hG4bKm2", Method::Invite, true);
        assert!(!registry.is_merged_request(&request, &key));
        assert_eq!(MergeKey::from_request(&request).unwrap().cseq, 1);
    }
}
