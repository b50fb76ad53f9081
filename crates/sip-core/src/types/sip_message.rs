//! Either a request or a response

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::header::TypedHeader;
use crate::types::header_access::HeaderAccess;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;

/// A parsed SIP message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            Message::Request(_) => None,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(r) => r.to_bytes(),
            Message::Response(r) => r.to_bytes(),
        }
    }

    /// Short description for log lines, e.g. `INVITE` or `180 Ringing`
    pub fn short_description(&self) -> String {
        match self {
            Message::Request(r) => r.method.to_string(),
            Message::Response(r) => format!("{} {}", r.status_code(), r.reason_phrase()),
        }
    }
}

impl HeaderAccess for Message {
    fn headers(&self) -> &[TypedHeader] {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }

    fn headers_mut(&mut self) -> &mut Vec<TypedHeader> {
        match self {
            Message::Request(r) => &mut r.headers,
            Message::Response(r) => &mut r.headers,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => write!(f, "{}", r),
            Message::Response(r) => write!(f, "{}", r),
        }
    }
}
