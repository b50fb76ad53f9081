//! # Via header
//!
//! `SIP/2.0/UDP host:port;branch=z9hG4bK...;received=...;rport`
//! ([RFC 3261 §20.42](https://datatracker.ietf.org/doc/html/rfc3261#section-20.42)).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::via::parse_via;
use crate::types::param::{find_param, set_param, write_params, Param};

/// Magic cookie prefixing RFC 3261 branch ids
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A single Via entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Via {
    /// `SIP/2.0`
    pub protocol: String,
    /// `UDP`, `TCP`, `TLS`, ...
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<Param>,
}

impl Via {
    pub fn new(transport: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Via {
            protocol: "SIP/2.0".to_string(),
            transport: transport.into().to_ascii_uppercase(),
            host: host.into(),
            port,
            params: Vec::new(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        set_param(&mut self.params, Param::branch(branch));
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        set_param(&mut self.params, param);
        self
    }

    pub fn branch(&self) -> Option<&str> {
        self.value_of("branch")
    }

    /// True when the branch carries the RFC 3261 magic cookie
    pub fn is_rfc3261_branch(&self) -> bool {
        self.branch()
            .map(|b| b.starts_with(BRANCH_MAGIC_COOKIE))
            .unwrap_or(false)
    }

    pub fn received(&self) -> Option<&str> {
        self.value_of("received")
    }

    /// `rport` value; `Some(None)` when the flag is present without a value
    pub fn rport(&self) -> Option<Option<u16>> {
        find_param(&self.params, "rport").map(|p| p.value.as_ref().and_then(|v| v.parse().ok()))
    }

    pub fn set_received(&mut self, received: impl Into<String>) {
        set_param(&mut self.params, Param::new("received", received));
    }

    pub fn set_rport(&mut self, port: u16) {
        set_param(&mut self.params, Param::new("rport", port.to_string()));
    }

    /// Host to which responses are sent (`received`, else sent-by host)
    pub fn response_host(&self) -> &str {
        self.received().unwrap_or(&self.host)
    }

    /// Port to which responses are sent (`rport`, else sent-by port, else 5060)
    pub fn response_port(&self) -> u16 {
        match self.rport() {
            Some(Some(port)) => port,
            _ => self.port.unwrap_or(5060),
        }
    }

    fn value_of(&self, name: &str) -> Option<&str> {
        find_param(&self.params, name).and_then(|p| p.value.as_deref())
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.protocol, self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write_params(f, &self.params)
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_via(s)
    }
}
