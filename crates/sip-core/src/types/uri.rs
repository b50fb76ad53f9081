//! # SIP URIs
//!
//! A deliberately small URI model: scheme, optional user part, host, port and
//! `;param` list. URI headers (`?a=b`) are kept verbatim in `headers`.
//!
//! ```rust
//! use sipflow_sip_core::Uri;
//!
//! let uri: Uri = "sip:proxy.example.com:5070;lr".parse().unwrap();
//! assert!(uri.is_loose_route());
//! assert_eq!(uri.port, Some(5070));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::uri::parse_uri;
use crate::types::param::{find_param, write_params, Param};

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// `sip:`
    Sip,
    /// `sips:`
    Sips,
    /// `tel:`
    Tel,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
            Scheme::Tel => "tel",
        }
    }
}

/// SIP/SIPS/TEL URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<Param>,
    /// Raw `?headers` part, without the question mark
    pub headers: Option<String>,
}

impl Uri {
    /// `sip:host`
    pub fn sip(host: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
            headers: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        crate::types::param::set_param(&mut self.params, param);
        self
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        find_param(&self.params, name)
    }

    /// True when the URI carries the `lr` parameter (RFC 3261 §16.12)
    pub fn is_loose_route(&self) -> bool {
        self.param("lr").is_some()
    }

    /// `transport=` parameter, lower-cased
    pub fn transport(&self) -> Option<String> {
        self.param("transport")
            .and_then(|p| p.value.as_ref())
            .map(|v| v.to_ascii_lowercase())
    }

    /// Port to contact when none is given
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(match self.scheme {
            Scheme::Sips => 5061,
            _ => 5060,
        })
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write_params(f, &self.params)?;
        if let Some(headers) = &self.headers {
            write!(f, "?{}", headers)?;
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_uri(s)
    }
}
