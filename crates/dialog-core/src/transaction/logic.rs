//! The seam between the generic runner and the four RFC 3261 machines

use std::sync::Arc;

use async_trait::async_trait;
use sipflow_sip_core::{Message, Response};

use crate::transaction::data::{TimerHandles, TransactionData};
use crate::transaction::error::{Error, Result};
use crate::transaction::{TransactionKind, TransactionState, TransactionTimer};

/// Behaviour of one transaction machine.
///
/// Every method runs on the transaction's runner task, so implementations see
/// a consistent state and never race with themselves. A returned state is
/// validated and applied by the runner, which then calls
/// [`on_enter_state`](TransactionLogic::on_enter_state).
#[async_trait]
pub trait TransactionLogic: Send + Sync + 'static {
    fn kind(&self) -> TransactionKind;

    /// Arms and cancels timers for the state just entered
    async fn on_enter_state(
        &self,
        data: &Arc<TransactionData>,
        new_state: TransactionState,
        previous_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<()>;

    async fn process_message(
        &self,
        data: &Arc<TransactionData>,
        message: Message,
        current_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>>;

    async fn handle_timer(
        &self,
        data: &Arc<TransactionData>,
        timer: TransactionTimer,
        current_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>>;

    /// Sends a response from the transaction user. Client machines refuse.
    async fn send_response(
        &self,
        _data: &Arc<TransactionData>,
        _response: Response,
        current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        Err(Error::invalid_state(current_state, "send_response on a client transaction"))
    }
}
