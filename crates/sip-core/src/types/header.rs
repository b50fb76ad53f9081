//! # Header names and typed header values
//!
//! Only the headers the transaction and dialog layers inspect are modelled as
//! typed values. Everything else travels as [`TypedHeader::Other`] and is
//! written back out verbatim.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::headers::parse_header_value;
use crate::types::address::Address;
use crate::types::cseq::{CSeq, RAck};
use crate::types::via::Via;

/// Header field name. Comparison is case-insensitive and compact forms are
/// folded onto their full names on parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeaderName {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    Route,
    RecordRoute,
    MaxForwards,
    ContentLength,
    ContentType,
    Event,
    RSeq,
    RAck,
    RetryAfter,
    Require,
    Supported,
    Other(String),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::Event => "Event",
            HeaderName::RSeq => "RSeq",
            HeaderName::RAck => "RAck",
            HeaderName::RetryAfter => "Retry-After",
            HeaderName::Require => "Require",
            HeaderName::Supported => "Supported",
            HeaderName::Other(name) => name,
        }
    }

    /// Headers whose values may be comma-joined on a single line
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            HeaderName::Via
                | HeaderName::Contact
                | HeaderName::Route
                | HeaderName::RecordRoute
                | HeaderName::Require
                | HeaderName::Supported
        )
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl Eq for HeaderName {}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return Err(Error::Parse(format!("invalid header name '{}'", s)));
        }
        let name = match s.to_ascii_lowercase().as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "max-forwards" => HeaderName::MaxForwards,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "event" | "o" => HeaderName::Event,
            "rseq" => HeaderName::RSeq,
            "rack" => HeaderName::RAck,
            "retry-after" => HeaderName::RetryAfter,
            "require" => HeaderName::Require,
            "supported" | "k" => HeaderName::Supported,
            "e" => HeaderName::Other("Content-Encoding".to_string()),
            _ => HeaderName::Other(s.to_string()),
        };
        Ok(name)
    }
}

/// A header with a structured value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedHeader {
    Via(Via),
    From(Address),
    To(Address),
    CallId(String),
    CSeq(CSeq),
    Contact(Address),
    Route(Address),
    RecordRoute(Address),
    MaxForwards(u8),
    ContentLength(u32),
    ContentType(String),
    /// Event package with its parameters, e.g. `presence;id=7`
    Event(String),
    RSeq(u32),
    RAck(RAck),
    /// Seconds
    RetryAfter(u32),
    Require(Vec<String>),
    Supported(Vec<String>),
    /// Any header kept as raw text
    Other(HeaderName, String),
}

impl TypedHeader {
    pub fn name(&self) -> HeaderName {
        match self {
            TypedHeader::Via(_) => HeaderName::Via,
            TypedHeader::From(_) => HeaderName::From,
            TypedHeader::To(_) => HeaderName::To,
            TypedHeader::CallId(_) => HeaderName::CallId,
            TypedHeader::CSeq(_) => HeaderName::CSeq,
            TypedHeader::Contact(_) => HeaderName::Contact,
            TypedHeader::Route(_) => HeaderName::Route,
            TypedHeader::RecordRoute(_) => HeaderName::RecordRoute,
            TypedHeader::MaxForwards(_) => HeaderName::MaxForwards,
            TypedHeader::ContentLength(_) => HeaderName::ContentLength,
            TypedHeader::ContentType(_) => HeaderName::ContentType,
            TypedHeader::Event(_) => HeaderName::Event,
            TypedHeader::RSeq(_) => HeaderName::RSeq,
            TypedHeader::RAck(_) => HeaderName::RAck,
            TypedHeader::RetryAfter(_) => HeaderName::RetryAfter,
            TypedHeader::Require(_) => HeaderName::Require,
            TypedHeader::Supported(_) => HeaderName::Supported,
            TypedHeader::Other(name, _) => name.clone(),
        }
    }

    /// Parses a header value that holds exactly one element
    pub fn parse(name: HeaderName, value: &str) -> Result<Self> {
        let mut headers = parse_header_value(&name, value.as_bytes())?;
        match headers.len() {
            1 => Ok(headers.remove(0)),
            n => Err(Error::invalid_header(
                name.as_str(),
                format!("expected one value, found {}", n),
            )),
        }
    }
}

impl fmt::Display for TypedHeader {
    /// Writes `Name: value` without the trailing CRLF
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name())?;
        match self {
            TypedHeader::Via(v) => write!(f, "{}", v),
            TypedHeader::From(a)
            | TypedHeader::To(a)
            | TypedHeader::Contact(a)
            | TypedHeader::Route(a)
            | TypedHeader::RecordRoute(a) => write!(f, "{}", a),
            TypedHeader::CallId(v)
            | TypedHeader::ContentType(v)
            | TypedHeader::Event(v)
            | TypedHeader::Other(_, v) => f.write_str(v),
            TypedHeader::CSeq(c) => write!(f, "{}", c),
            TypedHeader::MaxForwards(n) => write!(f, "{}", n),
            TypedHeader::ContentLength(n) | TypedHeader::RSeq(n) | TypedHeader::RetryAfter(n) => {
                write!(f, "{}", n)
            }
            TypedHeader::RAck(r) => write!(f, "{}", r),
            TypedHeader::Require(t) | TypedHeader::Supported(t) => f.write_str(&t.join(", ")),
        }
    }
}
