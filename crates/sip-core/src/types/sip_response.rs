//! # SIP Response Message

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::header::TypedHeader;
use crate::types::header_access::HeaderAccess;
use crate::types::sip_request::{encode, write_headers_and_body, Request};
use crate::types::status::StatusCode;

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    /// Reason phrase override; the status code's default phrase is used otherwise
    pub reason: Option<String>,
    pub headers: Vec<TypedHeader>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Response {
            status,
            reason: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Builds a response to `request` (RFC 3261 §8.2.6.2).
    ///
    /// Via, From, To, Call-ID and CSeq are copied. Record-Route is copied for
    /// dialog-creating requests answered with 1xx/2xx (§12.1.1). Adding a
    /// To-tag is left to the caller.
    pub fn from_request(request: &Request, status: StatusCode) -> Self {
        let copy_record_route = request.method.creates_dialog() && status.as_u16() < 300;
        let headers = request
            .headers
            .iter()
            .filter(|h| match h {
                TypedHeader::Via(_)
                | TypedHeader::From(_)
                | TypedHeader::To(_)
                | TypedHeader::CallId(_)
                | TypedHeader::CSeq(_) => true,
                TypedHeader::RecordRoute(_) => copy_record_route,
                _ => false,
            })
            .cloned()
            .collect();
        Response {
            status,
            reason: None,
            headers,
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, header: TypedHeader) -> Self {
        self.headers.push(header);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn to_bytes(&self) -> Bytes {
        encode(
            format!("SIP/2.0 {} {}\r\n", self.status.as_u16(), self.reason_phrase()),
            &self.headers,
            &self.body,
        )
    }
}

impl HeaderAccess for Response {
    fn headers(&self) -> &[TypedHeader] {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Vec<TypedHeader> {
        &mut self.headers
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SIP/2.0 {} {}\r\n",
            self.status.as_u16(),
            self.reason_phrase()
        )?;
        write_headers_and_body(f, &self.headers, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address::Address;
    use crate::types::cseq::CSeq;
    use crate::types::method::Method;
    use crate::types::via::Via;

    fn invite() -> Request {
        Request::new(Method::Invite, "sip:bob@biloxi.example.com".parse().unwrap())
            .with_header(TypedHeader::Via(Via::new("UDP", "pc33", Some(5060)).with_branch("z9hG4bK1")))
            .with_header(TypedHeader::From(
                "<sip:alice@atlanta.example.com>;tag=88".parse::<Address>().unwrap(),
            ))
            .with_header(TypedHeader::To("<sip:bob@biloxi.example.com>".parse().unwrap()))
            .with_header(TypedHeader::CallId("cid".into()))
            .with_header(TypedHeader::CSeq(CSeq::new(1, Method::Invite)))
            .with_header(TypedHeader::RecordRoute("<sip:p1.example.com;lr>".parse().unwrap()))
            .with_header(TypedHeader::MaxForwards(70))
    }

    #[test]
    fn test_from_request_copies_dialog_headers() {
        let response = Response::from_request(&invite(), StatusCode::Ringing);
        assert_eq!(response.call_id(), Some("cid"));
        assert_eq!(response.branch(), Some("z9hG4bK1"));
        assert_eq!(response.record_routes().len(), 1);
        assert!(response
            .headers
            .iter()
            .all(|h| !matches!(h, TypedHeader::MaxForwards(_))));

        let busy = Response::from_request(&invite(), StatusCode::BusyHere);
        assert!(busy.record_routes().is_empty());
    }

    #[test]
    fn test_dialog_id_orientation() {
        let mut response = Response::from_request(&invite(), StatusCode::Ok);
        response.to_mut().unwrap().set_tag("99");
        assert_eq!(response.dialog_id(false).as_deref(), Some("cid:88:99"));
        assert_eq!(response.dialog_id(true).as_deref(), Some("cid:99:88"));
    }
}
