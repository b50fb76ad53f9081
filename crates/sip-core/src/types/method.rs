//! # SIP Methods
//!
//! Request methods from RFC 3261 and the extensions the transaction and dialog
//! layers care about (PRACK from RFC 3262, SUBSCRIBE/NOTIFY from RFC 6665,
//! REFER from RFC 3515, UPDATE from RFC 3311).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A SIP request method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// INVITE: establishes a session
    Invite,
    /// ACK: acknowledges a final response to INVITE
    Ack,
    /// BYE: terminates a session
    Bye,
    /// CANCEL: cancels a pending INVITE
    Cancel,
    /// OPTIONS: capability query
    Options,
    /// REGISTER: binds a contact to an address-of-record
    Register,
    /// PRACK: acknowledges a reliable provisional response (RFC 3262)
    Prack,
    /// SUBSCRIBE: requests event notification (RFC 6665)
    Subscribe,
    /// NOTIFY: delivers event state (RFC 6665)
    Notify,
    /// REFER: asks the peer to issue a request (RFC 3515)
    Refer,
    /// INFO: mid-session information (RFC 6086)
    Info,
    /// UPDATE: session modification before answer (RFC 3311)
    Update,
    /// MESSAGE: instant message (RFC 3428)
    Message,
    /// PUBLISH: event state publication (RFC 3903)
    Publish,
    /// Any other token
    Extension(String),
}

impl Method {
    /// The method token as it appears on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Prack => "PRACK",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Info => "INFO",
            Method::Update => "UPDATE",
            Method::Message => "MESSAGE",
            Method::Publish => "PUBLISH",
            Method::Extension(token) => token,
        }
    }

    /// Methods whose successful (or tagged provisional) responses establish a dialog
    pub fn creates_dialog(&self) -> bool {
        matches!(self, Method::Invite | Method::Subscribe | Method::Refer)
    }

    /// Target refresh requests update the remote target from their Contact
    pub fn is_target_refresh(&self) -> bool {
        matches!(
            self,
            Method::Invite | Method::Update | Method::Subscribe | Method::Notify | Method::Refer
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let method = match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "REGISTER" => Method::Register,
            "PRACK" => Method::Prack,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "REFER" => Method::Refer,
            "INFO" => Method::Info,
            "UPDATE" => Method::Update,
            "MESSAGE" => Method::Message,
            "PUBLISH" => Method::Publish,
            other => {
                let is_token = !other.is_empty()
                    && other
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c));
                if !is_token {
                    return Err(Error::InvalidMethod(other.to_string()));
                }
                Method::Extension(other.to_string())
            }
        };
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip_and_extension() {
        assert_eq!("INVITE".parse::<Method>().unwrap(), Method::Invite);
        assert_eq!(Method::Prack.to_string(), "PRACK");
        assert_eq!(
            "X-PING".parse::<Method>().unwrap(),
            Method::Extension("X-PING".to_string())
        );
        assert!("BAD METHOD".parse::<Method>().is_err());
    }

    #[test]
    fn test_dialog_creating_methods() {
        assert!(Method::Invite.creates_dialog());
        assert!(Method::Subscribe.creates_dialog());
        assert!(Method::Refer.creates_dialog());
        assert!(!Method::Bye.creates_dialog());
        assert!(!Method::Notify.creates_dialog());
    }
}
