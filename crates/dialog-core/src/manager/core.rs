//! Core stack state and lifecycle
//!
//! [`SipStack`] is a cheap, cloneable handle over [`StackInner`], which owns
//! the registry, the timer service and the channels connecting the transport,
//! the transactions and the listener. Two tasks drive it:
//!
//! - the **transport loop** feeds inbound messages through the dialog filter
//!   ([`message_routing`](super::message_routing))
//! - the **event loop** consumes [`TransactionEvent`]s and [`StackCommand`]s
//!   ([`event_processing`](super::event_processing))

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use sipflow_sip_transport::{Transport, TransportEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StackConfig;
use crate::dialog::{DialogId, DialogSettings, ReInviteSender};
use crate::errors::{DialogError, DialogResult};
use crate::events::{SipListener, TransportErrorEvent};
use crate::registry::Registry;
use crate::timer::{TimerId, TimerService};
use crate::transaction::{TransactionContext, TransactionEvent, TransactionKey};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Work scheduled by dialog timers and linger timers, executed on the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCommand {
    /// Next 2xx retransmission of a server INVITE dialog
    Retransmit2xx(DialogId),
    /// The application did not ACK the 2xx with this CSeq in time
    AckNotSent(DialogId, u32),
    /// The dialog is still early past its bound
    EarlyTimeout(DialogId),
    RemoveTransaction(TransactionKey),
    RemoveDialog(DialogId),
}

pub(crate) struct StackInner {
    pub(crate) config: StackConfig,
    pub(crate) dialog_settings: DialogSettings,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) listener: Arc<dyn SipListener>,
    pub(crate) registry: Registry,
    pub(crate) timers: Arc<TimerService>,
    pub(crate) events_tx: mpsc::Sender<TransactionEvent>,
    pub(crate) commands_tx: mpsc::Sender<StackCommand>,
    receivers: Mutex<Option<(mpsc::Receiver<TransactionEvent>, mpsc::Receiver<StackCommand>)>>,
    pub(crate) reinvite_senders: DashMap<DialogId, ReInviteSender>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl std::fmt::Debug for StackInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackInner")
            .field("transport", &self.transport)
            .field("transactions", &self.registry.transaction_count())
            .field("dialogs", &self.registry.dialog_count())
            .finish()
    }
}

/// The transaction and dialog layer bound to one transport
#[derive(Debug, Clone)]
pub struct SipStack {
    pub(crate) inner: Arc<StackInner>,
}

impl SipStack {
    /// Creates a stack. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: StackConfig,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn SipListener>,
    ) -> DialogResult<Self> {
        config.validate().map_err(DialogError::protocol_error)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let dialog_settings = DialogSettings::from(&config);

        Ok(Self {
            inner: Arc::new(StackInner {
                config,
                dialog_settings,
                transport,
                listener,
                registry: Registry::new(),
                timers: Arc::new(TimerService::new()),
                events_tx,
                commands_tx,
                receivers: Mutex::new(Some((events_rx, commands_rx))),
                reinvite_senders: DashMap::new(),
                tasks: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Spawns the transport loop over `transport_events` and the event loop.
    /// Fails if the stack was already started.
    pub fn start(&self, mut transport_events: mpsc::Receiver<TransportEvent>) -> DialogResult<()> {
        let (mut events_rx, mut commands_rx) = self
            .inner
            .receivers
            .lock()
            .take()
            .ok_or_else(|| DialogError::invalid_state("Stack already started"))?;
        self.inner.running.store(true, Ordering::Release);

        let inner = self.inner.clone();
        let transport_loop = tokio::spawn(async move {
            debug!("Transport loop started");
            while let Some(event) = transport_events.recv().await {
                match event {
                    TransportEvent::MessageReceived { message, source, .. } => {
                        inner.handle_message(message, source).await;
                    }
                    TransportEvent::Error { error } => {
                        warn!(%error, "Transport error");
                        inner
                            .listener
                            .on_transport_error(TransportErrorEvent { transaction: None, error });
                    }
                    TransportEvent::Closed => break,
                }
            }
            debug!("Transport loop stopped");
        });

        let inner = self.inner.clone();
        let event_loop = tokio::spawn(async move {
            debug!("Event loop started");
            loop {
                tokio::select! {
                    Some(event) = events_rx.recv() => inner.handle_transaction_event(event).await,
                    Some(command) = commands_rx.recv() => inner.handle_command(command).await,
                    else => break,
                }
            }
            debug!("Event loop stopped");
        });

        self.inner.tasks.lock().extend([transport_loop, event_loop]);
        info!(transport = ?self.inner.transport.local_addr().ok(), "SIP stack started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &StackConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Cancels every timer, stops both loops and closes the transport
    pub async fn shutdown(&self) -> DialogResult<()> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        info!("SIP stack shutting down");
        self.inner.timers.stop();
        self.inner.reinvite_senders.clear();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.transport.close().await?;
        Ok(())
    }
}

impl StackInner {
    pub(crate) fn transaction_context(&self) -> TransactionContext {
        TransactionContext {
            transport: self.transport.clone(),
            events_tx: self.events_tx.clone(),
            timers: self.timers.clone(),
            settings: self.config.timers,
            raise_retransmit_events: self.config.raise_retransmit_events,
        }
    }

    /// Pushes `command` onto the event loop after `delay`
    pub(crate) fn schedule_command(&self, delay: Duration, command: StackCommand) -> TimerId {
        let commands = self.commands_tx.clone();
        self.timers.schedule(delay, async move {
            let _ = commands.send(command).await;
        })
    }
}
