//! Stack configuration
//!
//! Every flag the transaction and dialog layers consult lives in
//! [`StackConfig`]. It deserializes from TOML, so deployments can keep it next
//! to their other settings:
//!
//! ```rust
//! use sipflow_dialog_core::config::StackConfig;
//!
//! let config = StackConfig::from_toml_str(r#"
//!     back_to_back_ua = true
//!     early_dialog_timeout_secs = 90
//!
//!     [timers]
//!     t1 = { secs = 0, nanos = 250000000 }
//! "#).unwrap();
//!
//! assert!(config.back_to_back_ua);
//! assert!(config.automatic_dialog_support);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timer::TimerSettings;

/// Flags and limits consumed by the transaction and dialog layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Create dialogs automatically for dialog-creating requests and responses
    pub automatic_dialog_support: bool,

    /// Answer merged requests with 482 and apply dialog error policies
    pub dialog_error_auto_handling: bool,

    /// Serialize re-INVITEs behind the ACK of the previous INVITE
    pub back_to_back_ua: bool,

    /// Reject in-dialog requests whose CSeq does not exceed the last one seen
    pub sequence_number_validation: bool,

    /// Seconds after the INVITE during which forked responses arriving after
    /// its transaction ended may still create dialogs; 0 disables this
    pub max_fork_time: u64,

    /// Multiple of T1 after which an unacknowledged 2xx gives up
    pub ack_timeout_factor: u32,

    /// Seconds an early dialog may wait for a final response
    pub early_dialog_timeout_secs: u64,

    /// Deliver NOTIFY requests that match no subscription instead of answering 481
    pub deliver_unsolicited_notify: bool,

    /// Raise a transaction-terminated event for ACKs absorbed by a dialog
    pub deliver_terminated_event_for_ack: bool,

    /// A 2xx to BYE terminates the dialog
    pub terminate_on_bye: bool,

    /// Bound on the wait for the ACK gate before a re-INVITE is abandoned
    pub reinvite_ack_wait: Duration,

    /// Time a terminated transaction stays matchable before it is dropped
    pub transaction_linger: Duration,

    /// Time a terminated dialog stays matchable before it is dropped
    pub dialog_linger: Duration,

    /// Capacity of the per-dialog response retransmission detection set
    pub retransmission_detection_capacity: usize,

    /// Report every request retransmission to the listener
    pub raise_retransmit_events: bool,

    /// When the 2xx retransmission cap is reached, terminate the dialog
    /// instead of only reporting a timeout
    pub ack_timeout_terminates_dialog: bool,

    /// Host this stack is reachable at, used in Via, Contact and to
    /// recognize Route headers naming it. Defaults to the bound address.
    pub advertised_host: Option<String>,

    /// Port paired with `advertised_host`; defaults to the bound port
    pub advertised_port: Option<u16>,

    /// RFC 3261 timer values
    pub timers: TimerSettings,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            automatic_dialog_support: true,
            dialog_error_auto_handling: true,
            back_to_back_ua: false,
            sequence_number_validation: true,
            max_fork_time: 0,
            ack_timeout_factor: 64,
            early_dialog_timeout_secs: 180,
            deliver_unsolicited_notify: false,
            deliver_terminated_event_for_ack: false,
            terminate_on_bye: true,
            reinvite_ack_wait: Duration::from_secs(32),
            transaction_linger: Duration::from_secs(8),
            dialog_linger: Duration::from_secs(8),
            retransmission_detection_capacity: 64,
            raise_retransmit_events: false,
            ack_timeout_terminates_dialog: true,
            advertised_host: None,
            advertised_port: None,
            timers: TimerSettings::default(),
        }
    }
}

impl StackConfig {
    /// Parses a TOML document; missing keys take their defaults
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        let config: StackConfig =
            toml::from_str(input).map_err(|e| format!("invalid stack configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Set back-to-back user agent mode
    pub fn with_back_to_back_ua(mut self, enabled: bool) -> Self {
        self.back_to_back_ua = enabled;
        self
    }

    pub fn with_automatic_dialog_support(mut self, enabled: bool) -> Self {
        self.automatic_dialog_support = enabled;
        self
    }

    pub fn with_dialog_error_auto_handling(mut self, enabled: bool) -> Self {
        self.dialog_error_auto_handling = enabled;
        self
    }

    pub fn with_sequence_number_validation(mut self, enabled: bool) -> Self {
        self.sequence_number_validation = enabled;
        self
    }

    pub fn with_deliver_unsolicited_notify(mut self, enabled: bool) -> Self {
        self.deliver_unsolicited_notify = enabled;
        self
    }

    /// Seconds during which forked responses to a finished INVITE still
    /// create dialogs; 0 disables
    pub fn with_max_fork_time(mut self, secs: u64) -> Self {
        self.max_fork_time = secs;
        self
    }

    pub fn with_deliver_terminated_event_for_ack(mut self, enabled: bool) -> Self {
        self.deliver_terminated_event_for_ack = enabled;
        self
    }

    pub fn with_early_dialog_timeout(mut self, secs: u64) -> Self {
        self.early_dialog_timeout_secs = secs;
        self
    }

    pub fn with_ack_timeout_factor(mut self, factor: u32) -> Self {
        self.ack_timeout_factor = factor;
        self
    }

    pub fn with_reinvite_ack_wait(mut self, wait: Duration) -> Self {
        self.reinvite_ack_wait = wait;
        self
    }

    pub fn with_linger(mut self, transaction: Duration, dialog: Duration) -> Self {
        self.transaction_linger = transaction;
        self.dialog_linger = dialog;
        self
    }

    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_raise_retransmit_events(mut self, enabled: bool) -> Self {
        self.raise_retransmit_events = enabled;
        self
    }

    pub fn with_ack_timeout_terminates_dialog(mut self, enabled: bool) -> Self {
        self.ack_timeout_terminates_dialog = enabled;
        self
    }

    /// Address published to peers when the socket is bound to a wildcard
    /// address or sits behind NAT
    pub fn with_advertised_address(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.advertised_host = Some(host.into());
        self.advertised_port = port;
        self
    }

    /// Cap on 2xx retransmission: `ack_timeout_factor × T1`
    pub fn ack_timeout(&self) -> Duration {
        self.timers.t1 * self.ack_timeout_factor
    }

    pub fn early_dialog_timeout(&self) -> Duration {
        Duration::from_secs(self.early_dialog_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.ack_timeout_factor == 0 {
            return Err("ack_timeout_factor must be at least 1".to_string());
        }
        if self.early_dialog_timeout_secs == 0 {
            return Err("early_dialog_timeout_secs must be greater than 0".to_string());
        }
        if self.retransmission_detection_capacity == 0 {
            return Err("retransmission_detection_capacity must be greater than 0".to_string());
        }
        if self.advertised_host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err("advertised_host must not be empty".to_string());
        }
        if self.reinvite_ack_wait.is_zero() {
            return Err("reinvite_ack_wait must be greater than 0".to_string());
        }
        self.timers.validate()
    }
}
