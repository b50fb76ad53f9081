//! Name-addr values used by From, To, Contact, Route and Record-Route

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::address::parse_address;
use crate::types::param::{find_param, set_param, write_params, Param};
use crate::types::uri::Uri;

/// `"Display" <uri>;params`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub display_name: Option<String>,
    pub uri: Uri,
    /// Header parameters (outside the angle brackets)
    pub params: Vec<Param>,
}

impl Address {
    pub fn new(uri: Uri) -> Self {
        Address {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        set_param(&mut self.params, Param::tag(tag));
    }

    /// `tag` parameter, if present and non-empty
    pub fn tag(&self) -> Option<&str> {
        find_param(&self.params, "tag")
            .and_then(|p| p.value.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        find_param(&self.params, name)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        write_params(f, &self.params)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_address(s)
    }
}
