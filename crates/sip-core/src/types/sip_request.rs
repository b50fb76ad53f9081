//! # SIP Request Message
//!
//! A request line (method, Request-URI), a header list and an optional body.
//!
//! ```rust
//! use sipflow_sip_core::prelude::*;
//!
//! let request = Request::new(Method::Options, "sip:bob@biloxi.example.com".parse().unwrap())
//!     .with_header(TypedHeader::CallId("a84b4c76e66710".to_string()))
//!     .with_header(TypedHeader::CSeq(CSeq::new(63104, Method::Options)));
//!
//! assert_eq!(request.call_id(), Some("a84b4c76e66710"));
//! assert_eq!(request.cseq().unwrap().seq, 63104);
//! ```

use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::types::header::{HeaderName, TypedHeader};
use crate::types::header_access::HeaderAccess;
use crate::types::method::Method;
use crate::types::uri::Uri;

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Vec<TypedHeader>,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, header: TypedHeader) -> Self {
        self.headers.push(header);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> Method {
        self.method.clone()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Max-Forwards value, when present
    pub fn max_forwards(&self) -> Option<u8> {
        self.headers.iter().find_map(|h| match h {
            TypedHeader::MaxForwards(n) => Some(*n),
            _ => None,
        })
    }

    /// Serializes to wire format; Content-Length is always recomputed
    pub fn to_bytes(&self) -> Bytes {
        encode(
            format!("{} {} SIP/2.0\r\n", self.method, self.uri),
            &self.headers,
            &self.body,
        )
    }
}

impl HeaderAccess for Request {
    fn headers(&self) -> &[TypedHeader] {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Vec<TypedHeader> {
        &mut self.headers
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.method, self.uri)?;
        write_headers_and_body(f, &self.headers, &self.body)
    }
}

/// Start line, headers, recomputed Content-Length, blank line, raw body
pub(crate) fn encode(start_line: String, headers: &[TypedHeader], body: &Bytes) -> Bytes {
    let mut head = start_line;
    for header in headers {
        if header.name() == HeaderName::ContentLength {
            continue;
        }
        head.push_str(&header.to_string());
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut buf = BytesMut::with_capacity(head.len() + body.len());
    buf.extend_from_slice(head.as_bytes());
    buf.extend_from_slice(body);
    buf.freeze()
}

pub(crate) fn write_headers_and_body(
    f: &mut fmt::Formatter<'_>,
    headers: &[TypedHeader],
    body: &Bytes,
) -> fmt::Result {
    for header in headers {
        if header.name() == HeaderName::ContentLength {
            continue;
        }
        write!(f, "{}\r\n", header)?;
    }
    write!(f, "Content-Length: {}\r\n\r\n", body.len())?;
    f.write_str(&String::from_utf8_lossy(body))
}
