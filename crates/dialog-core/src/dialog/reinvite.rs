//! Per-dialog single-flight queue for re-INVITEs
//!
//! In back-to-back user agent mode a re-INVITE may only go out once the ACK
//! for the previous INVITE exchange is done. Requests are queued here and a
//! worker hands them one at a time to a [`ReInviteDispatch`], which waits on
//! the dialog's ACK gate before sending.

use std::sync::Weak;

use async_trait::async_trait;
use sipflow_sip_core::Request;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::DialogId;
use crate::errors::{DialogError, DialogResult};
use crate::transaction::ClientTransaction;

const QUEUE_CAPACITY: usize = 16;

/// Sends a re-INVITE once the dialog allows it
#[async_trait]
pub trait ReInviteDispatch: Send + Sync + 'static {
    async fn dispatch_reinvite(&self, dialog: DialogId, request: Request) -> DialogResult<ClientTransaction>;
}

struct ReInviteJob {
    request: Request,
    reply: oneshot::Sender<DialogResult<ClientTransaction>>,
}

/// Handle to the queue of one dialog
#[derive(Debug, Clone)]
pub struct ReInviteSender {
    dialog: DialogId,
    jobs: mpsc::Sender<ReInviteJob>,
}

impl std::fmt::Debug for ReInviteJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReInviteJob")
            .field("method", &self.request.method)
            .finish()
    }
}

impl ReInviteSender {
    /// Spawns the worker. It stops when every sender is dropped or the
    /// dispatcher is gone.
    pub fn spawn<D: ReInviteDispatch>(dialog: DialogId, dispatcher: Weak<D>) -> Self {
        let (jobs, mut rx) = mpsc::channel::<ReInviteJob>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            debug!(dialog = %dialog, "re-INVITE worker started");
            while let Some(job) = rx.recv().await {
                let Some(dispatcher) = dispatcher.upgrade() else {
                    let _ = job.reply.send(Err(DialogError::invalid_state("Stack has shut down")));
                    break;
                };
                trace!(dialog = %dialog, "Dispatching queued re-INVITE");
                let result = dispatcher.dispatch_reinvite(dialog, job.request).await;
                let _ = job.reply.send(result);
            }
            debug!(dialog = %dialog, "re-INVITE worker stopped");
        });
        Self { dialog, jobs }
    }

    pub fn dialog(&self) -> DialogId {
        self.dialog
    }

    /// Queues `request` and waits until it has been sent or refused
    pub async fn send(&self, request: Request) -> DialogResult<ClientTransaction> {
        let (reply, outcome) = oneshot::channel();
        self.jobs
            .send(ReInviteJob { request, reply })
            .await
            .map_err(|_| DialogError::concurrency_error(format!("re-INVITE queue of {} is closed", self.dialog)))?;
        outcome
            .await
            .map_err(|_| DialogError::concurrency_error(format!("re-INVITE worker of {} stopped", self.dialog)))?
    }
}
