//! # Fluent message builders
//!
//! [`SimpleRequestBuilder`] and [`SimpleResponseBuilder`] assemble messages from
//! string inputs. Parse failures are remembered and surfaced from `build()` so
//! call chains stay flat.
//!
//! ```rust
//! use sipflow_sip_core::prelude::*;
//!
//! let invite = SimpleRequestBuilder::new(Method::Invite, "sip:bob@biloxi.example.com")
//!     .from("Alice", "sip:alice@atlanta.example.com", Some("1928301774"))
//!     .to("Bob", "sip:bob@biloxi.example.com", None)
//!     .call_id("a84b4c76e66710")
//!     .cseq(314159)
//!     .via("pc33.atlanta.example.com:5060", "UDP", Some("z9hG4bK776asdhds"))
//!     .max_forwards(70)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(invite.cseq().unwrap().method, Method::Invite);
//! ```

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::address::Address;
use crate::types::cseq::CSeq;
use crate::types::header::TypedHeader;
use crate::types::header_access::HeaderAccess;
use crate::types::method::Method;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::status::StatusCode;
use crate::parser::uri::parse_host_port;
use crate::types::uri::Uri;
use crate::types::via::Via;

/// Builder for SIP requests
#[derive(Debug, Clone)]
pub struct SimpleRequestBuilder {
    request: Option<Request>,
    error: Option<Error>,
}

impl SimpleRequestBuilder {
    pub fn new(method: Method, uri: &str) -> Self {
        match uri.parse::<Uri>() {
            Ok(uri) => SimpleRequestBuilder {
                request: Some(Request::new(method, uri)),
                error: None,
            },
            Err(e) => SimpleRequestBuilder {
                request: None,
                error: Some(e),
            },
        }
    }

    /// Starts from an existing request, e.g. to derive an ACK or CANCEL
    pub fn from_request(request: Request) -> Self {
        SimpleRequestBuilder {
            request: Some(request),
            error: None,
        }
    }

    fn apply(mut self, f: impl FnOnce(&mut Request) -> Result<()>) -> Self {
        if self.error.is_none() {
            if let Some(request) = self.request.as_mut() {
                if let Err(e) = f(request) {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    pub fn from(self, display_name: &str, uri: &str, tag: Option<&str>) -> Self {
        let addr = address(display_name, uri, tag);
        self.apply(|r| {
            r.set_header(TypedHeader::From(addr?));
            Ok(())
        })
    }

    pub fn to(self, display_name: &str, uri: &str, tag: Option<&str>) -> Self {
        let addr = address(display_name, uri, tag);
        self.apply(|r| {
            r.set_header(TypedHeader::To(addr?));
            Ok(())
        })
    }

    pub fn call_id(self, call_id: &str) -> Self {
        let call_id = call_id.to_string();
        self.apply(|r| {
            r.set_header(TypedHeader::CallId(call_id));
            Ok(())
        })
    }

    /// CSeq with the request's own method
    pub fn cseq(self, seq: u32) -> Self {
        self.apply(|r| {
            let method = r.method.clone();
            r.set_header(TypedHeader::CSeq(CSeq::new(seq, method)));
            Ok(())
        })
    }

    /// Appends a Via. `sent_by` is `host[:port]`.
    pub fn via(self, sent_by: &str, transport: &str, branch: Option<&str>) -> Self {
        let sent_by = sent_by.to_string();
        let transport = transport.to_string();
        let branch = branch.map(str::to_string);
        self.apply(move |r| {
            let (host, port) = parse_host_port(&sent_by)?;
            let mut via = Via::new(transport, host, port);
            if let Some(branch) = branch {
                via = via.with_branch(branch);
            }
            r.push_header(TypedHeader::Via(via));
            Ok(())
        })
    }

    pub fn max_forwards(self, hops: u8) -> Self {
        self.apply(|r| {
            r.set_header(TypedHeader::MaxForwards(hops));
            Ok(())
        })
    }

    pub fn contact(self, uri: &str) -> Self {
        let uri = uri.parse::<Uri>();
        self.apply(|r| {
            r.push_header(TypedHeader::Contact(Address::new(uri?)));
            Ok(())
        })
    }

    pub fn route(self, uri: &str) -> Self {
        let uri = uri.parse::<Uri>();
        self.apply(|r| {
            r.push_header(TypedHeader::Route(Address::new(uri?)));
            Ok(())
        })
    }

    pub fn event(self, event: &str) -> Self {
        let event = event.to_string();
        self.apply(|r| {
            r.set_header(TypedHeader::Event(event));
            Ok(())
        })
    }

    pub fn header(self, header: TypedHeader) -> Self {
        self.apply(|r| {
            r.push_header(header);
            Ok(())
        })
    }

    pub fn content_type(self, content_type: &str) -> Self {
        self.header(TypedHeader::ContentType(content_type.to_string()))
    }

    pub fn body(self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.apply(|r| {
            r.body = body;
            Ok(())
        })
    }

    pub fn build(self) -> Result<Request> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.request
            .ok_or_else(|| Error::Parse("request builder has no request".to_string()))
    }
}

/// Builder for SIP responses, usually seeded from the request being answered
#[derive(Debug, Clone)]
pub struct SimpleResponseBuilder {
    response: Response,
    error: Option<Error>,
}

impl SimpleResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        SimpleResponseBuilder {
            response: Response::new(status),
            error: None,
        }
    }

    /// Copies the headers RFC 3261 §8.2.6.2 requires from `request`
    pub fn response_from_request(request: &Request, status: StatusCode) -> Self {
        SimpleResponseBuilder {
            response: Response::from_request(request, status),
            error: None,
        }
    }

    /// Sets the To-tag unless one is already present
    pub fn to_tag(mut self, tag: &str) -> Self {
        if let Some(to) = self.response.to_mut() {
            if to.tag().is_none() {
                to.set_tag(tag);
            }
        }
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.response.reason = Some(reason.to_string());
        self
    }

    pub fn contact(mut self, uri: &str) -> Self {
        match uri.parse::<Uri>() {
            Ok(uri) => self
                .response
                .push_header(TypedHeader::Contact(Address::new(uri))),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn header(mut self, header: TypedHeader) -> Self {
        self.response.push_header(header);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(self) -> Result<Response> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.response),
        }
    }
}

fn address(display_name: &str, uri: &str, tag: Option<&str>) -> Result<Address> {
    let mut addr = Address::new(uri.parse()?);
    if !display_name.is_empty() {
        addr.display_name = Some(display_name.to_string());
    }
    if let Some(tag) = tag {
        addr.set_tag(tag);
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_uri_surfaces_at_build() {
        let result = SimpleRequestBuilder::new(Method::Bye, "sip:bob@example.com")
            .from("", "nonsense", None)
            .call_id("x")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_response_builder_keeps_existing_tag() {
        let request = SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .from("", "sip:alice@example.com", Some("a"))
            .to("", "sip:bob@example.com", Some("existing"))
            .call_id("c")
            .cseq(2)
            .via("10.0.0.1:5060", "UDP", Some("z9hG4bKq"))
            .build()
            .unwrap();
        let response = SimpleResponseBuilder::response_from_request(&request, StatusCode::Ok)
            .to_tag("new")
            .build()
            .unwrap();
        assert_eq!(response.to_tag(), Some("existing"));
        assert_eq!(response.via().unwrap().port, Some(5060));
    }
}
